//! Mutable ANN vector index.
//!
//! The ANN structure assigns its own slot numbers and cannot remove
//! entries, so every mutation goes through an id-mapping layer that sits
//! beside it:
//!
//! ```text
//! absent --add--> present --update--> present --delete--> absent
//! ```
//!
//! - **add** embeds the text, appends a slot, then records the mapping
//! - **update** is delete-then-add; vectors are never mutated in place
//! - **delete** tombstones the slot, then drops both mapping directions
//!
//! The structure is always mutated before the mapping, so a crash between
//! the two leaves at worst an orphan slot, which
//! [`load`](VectorIndex::load) tombstones during reconciliation.
//!
//! Tombstoned slots are skipped at query time and reclaimed by
//! [`compact`](VectorIndex::compact).

mod backend;
mod mapping;
mod metric;
mod persist;

pub use backend::IndexKind;
pub use metric::DistanceMetric;
pub use persist::ReconcileReport;

use super::filter::MetadataFilter;
use super::types::{
    validate_dimension, CompactionStats, DocId, Document, Metadata, RetrievalResult, SearchError,
    SourceKind,
};
use crate::config::COMPACTION_THRESHOLD;
use crate::embedding::{embed_with_timeout, EmbeddingProvider};
use backend::AnnStructure;
use mapping::IdMapping;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Vector section of [`RetrievalConfig`](crate::config::RetrievalConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    /// ANN backend
    pub index_kind: IndexKind,
    /// Distance metric
    pub metric: DistanceMetric,
}

/// Embedding index with stable document ids, tombstone deletion and
/// metadata filter pushdown.
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    embed_timeout: Duration,
    metric: DistanceMetric,
    structure: AnnStructure,
    /// Document per slot; `None` marks a tombstone
    slots: Vec<Option<Document>>,
    tombstones: usize,
    mapping: IdMapping,
}

impl VectorIndex {
    /// Creates an empty index whose dimension and model id come from
    /// `embedder`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        settings: VectorSettings,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            embed_timeout,
            metric: settings.metric,
            structure: AnnStructure::new(settings.index_kind, settings.metric),
            slots: Vec::new(),
            tombstones: 0,
            mapping: IdMapping::new(),
        }
    }

    /// Model id stamped into snapshots.
    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Embedding dimension.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// ANN backend.
    pub fn kind(&self) -> IndexKind {
        self.structure.kind()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// True if no live documents are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.structure.len()
    }

    /// Number of tombstoned slots.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    /// Fraction of slots that are tombstoned (0.0 - 1.0).
    pub fn tombstone_ratio(&self) -> f64 {
        let total = self.slot_count();
        if total == 0 {
            0.0
        } else {
            self.tombstones as f64 / total as f64
        }
    }

    /// True once tombstones exceed the compaction threshold.
    pub fn needs_compaction(&self) -> bool {
        self.tombstone_ratio() > f64::from(COMPACTION_THRESHOLD)
    }

    /// True if `id` is indexed.
    pub fn contains(&self, id: &DocId) -> bool {
        self.mapping.slot_of(id).is_some()
    }

    /// Indexed copy of a document.
    pub fn get(&self, id: &DocId) -> Option<&Document> {
        let slot = self.mapping.slot_of(id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Live documents in slot order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.slots.iter().flatten()
    }

    /// Stored embedding of a document.
    pub fn embedding_of(&self, id: &DocId) -> Option<Vec<f32>> {
        let slot = self.mapping.slot_of(id)?;
        self.structure.embedding(slot).map(<[f32]>::to_vec)
    }

    /// Embeds `text` with the index's provider, bounded by the configured
    /// timeout, and checks the dimension.
    ///
    /// Needs only `&self`, so callers holding the index behind a lock can
    /// embed under a read guard (or none) and mutate afterwards.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        embed_text(self.embedder.as_ref(), text, self.embed_timeout).await
    }

    /// Embeds and adds a document.
    ///
    /// # Errors
    ///
    /// [`SearchError::DuplicateDocument`] if the id is already indexed
    /// (checked before embedding); embedding failures and timeouts leave
    /// the index untouched.
    pub async fn add_document(&mut self, document: Document) -> Result<(), SearchError> {
        if self.contains(&document.id) {
            return Err(SearchError::DuplicateDocument(document.id));
        }
        let embedding = self.embed(&document.text).await?;
        self.add_embedded(document, embedding)
    }

    /// Adds a document with a precomputed embedding.
    #[instrument(skip_all, fields(doc_id = %document.id, slots = self.slots.len()))]
    pub fn add_embedded(
        &mut self,
        document: Document,
        embedding: Vec<f32>,
    ) -> Result<(), SearchError> {
        validate_dimension(self.dimension(), embedding.len())?;
        if self.contains(&document.id) {
            return Err(SearchError::DuplicateDocument(document.id));
        }

        // Structure first, then the mapping
        let slot = self.structure.insert(embedding.into_boxed_slice());
        debug_assert_eq!(slot, self.slots.len(), "ANN slots must be sequential");
        let id = document.id.clone();
        self.slots.push(Some(document));
        self.mapping.insert(slot, id);
        Ok(())
    }

    /// Replaces a document's text and/or metadata.
    ///
    /// A text change re-embeds; a metadata-only change reuses the stored
    /// vector. Either way the old slot is tombstoned and a new one added.
    ///
    /// # Errors
    ///
    /// [`SearchError::DocumentNotFound`] if `id` is not indexed.
    pub async fn update_document(
        &mut self,
        id: &DocId,
        new_text: Option<String>,
        new_metadata: Option<Metadata>,
    ) -> Result<(), SearchError> {
        let current = self
            .get(id)
            .cloned()
            .ok_or_else(|| SearchError::DocumentNotFound(id.clone()))?;

        let updated = Document {
            id: id.clone(),
            text: new_text.unwrap_or(current.text.clone()),
            metadata: new_metadata.unwrap_or(current.metadata),
        };

        let embedding = if updated.text != current.text {
            self.embed(&updated.text).await?
        } else {
            self.embedding_of(id)
                .ok_or_else(|| SearchError::Inconsistent(format!("no vector for {id}")))?
        };

        self.apply_update(updated, embedding)
    }

    /// Delete-then-add with a precomputed embedding.
    ///
    /// Validation happens before the delete, so a failing update leaves
    /// the previous version in place.
    pub fn apply_update(
        &mut self,
        document: Document,
        embedding: Vec<f32>,
    ) -> Result<(), SearchError> {
        validate_dimension(self.dimension(), embedding.len())?;
        if !self.contains(&document.id) {
            return Err(SearchError::DocumentNotFound(document.id));
        }
        self.delete_document(&document.id);
        self.add_embedded(document, embedding)
    }

    /// Tombstones a document. Returns false (and does nothing) if absent.
    #[instrument(skip(self), fields(slots = self.slots.len()))]
    pub fn delete_document(&mut self, id: &DocId) -> bool {
        let Some(slot) = self.mapping.slot_of(id) else {
            return false;
        };

        // Structure first, then the mapping
        if let Some(entry) = self.slots.get_mut(slot) {
            if entry.take().is_some() {
                self.tombstones += 1;
            }
        }
        self.mapping.remove_doc(id);

        if self.needs_compaction() {
            debug!(
                tombstone_ratio = self.tombstone_ratio(),
                "tombstone ratio above compaction threshold"
            );
        }
        true
    }

    /// Embeds `query` and returns the `k` nearest live documents.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, SearchError> {
        let embedding = self.embed(query).await?;
        self.search_by_embedding(&embedding, k, filter)
    }

    /// The `k` nearest live documents to `query`, best first.
    ///
    /// Scores lie in `[0, 1]`, higher is closer. With a filter only
    /// live slots whose metadata match are scanned, exactly, so a narrow
    /// filter never loses matches to a truncated ANN window.
    pub fn search_by_embedding(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, SearchError> {
        validate_dimension(self.dimension(), query.len())?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let hits: Vec<(usize, f32)> = match filter.filter(|f| !f.is_empty()) {
            Some(filter) => self.scan_filtered(query, k, filter),
            None => self
                .structure
                .nearest(query, k + self.tombstones)
                .into_iter()
                .filter(|(slot, _)| self.is_live(*slot))
                .take(k)
                .collect(),
        };

        Ok(hits
            .into_iter()
            .filter_map(|(slot, distance)| {
                let document = self.slots.get(slot)?.as_ref()?;
                Some(RetrievalResult {
                    document: document.clone(),
                    score: self.metric.score(distance),
                    source: SourceKind::Vector,
                })
            })
            .collect())
    }

    fn scan_filtered(&self, query: &[f32], k: usize, filter: &MetadataFilter) -> Vec<(usize, f32)> {
        let mut hits: Vec<(usize, f32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, doc)| {
                let doc = doc.as_ref()?;
                if !filter.matches(&doc.metadata) {
                    return None;
                }
                let embedding = self.structure.embedding(slot)?;
                Some((slot, self.metric.distance(query, embedding)))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(k);
        hits
    }

    fn is_live(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    /// Rebuilds the structure from live entries, dropping tombstones and
    /// renumbering slots.
    #[instrument(skip(self), fields(slots = self.slot_count(), tombstones = self.tombstones))]
    pub fn compact(&mut self) -> CompactionStats {
        let start = Instant::now();
        let ratio_before = self.tombstone_ratio();
        let removed = self.tombstones;

        let live = self.live_entries();
        self.reset();
        for (document, embedding) in live {
            let slot = self.structure.insert(embedding);
            self.mapping.insert(slot, document.id.clone());
            self.slots.push(Some(document));
        }

        let stats = CompactionStats {
            duration_ms: start.elapsed().as_millis() as u64,
            slots_removed: removed,
            tombstone_ratio_before: ratio_before,
            tombstone_ratio_after: self.tombstone_ratio(),
        };
        info!(
            slots_removed = stats.slots_removed,
            duration_ms = stats.duration_ms,
            "compacted vector index"
        );
        stats
    }

    fn live_entries(&self) -> Vec<(Document, Box<[f32]>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, doc)| {
                let doc = doc.as_ref()?;
                let embedding = self.structure.embedding(slot)?;
                Some((doc.clone(), embedding.into()))
            })
            .collect()
    }

    fn reset(&mut self) {
        self.structure = AnnStructure::new(self.structure.kind(), self.metric);
        self.slots.clear();
        self.tombstones = 0;
        self.mapping = IdMapping::new();
    }

    /// Verifies the mapping is a bijection onto exactly the live slots.
    pub fn check_consistency(&self) -> Result<(), SearchError> {
        if self.slots.len() != self.structure.len() {
            return Err(SearchError::Inconsistent(format!(
                "{} documents for {} slots",
                self.slots.len(),
                self.structure.len()
            )));
        }
        if !self.mapping.is_bijective() {
            return Err(SearchError::Inconsistent(
                "id mapping is not bijective".to_string(),
            ));
        }

        for (slot, id) in self.mapping.entries() {
            match self.slots.get(slot) {
                Some(Some(doc)) if doc.id == id => {}
                Some(Some(doc)) => {
                    return Err(SearchError::Inconsistent(format!(
                        "slot {slot} maps to {id} but holds {}",
                        doc.id
                    )))
                }
                _ => {
                    return Err(SearchError::Inconsistent(format!(
                        "{id} maps to dead slot {slot}"
                    )))
                }
            }
        }

        let live = self.slots.iter().filter(|s| s.is_some()).count();
        if live != self.mapping.len() || live + self.tombstones != self.slots.len() {
            return Err(SearchError::Inconsistent(format!(
                "{live} live slots, {} mapped, {} tombstones",
                self.mapping.len(),
                self.tombstones
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("model_id", &self.model_id())
            .field("dimension", &self.dimension())
            .field("metric", &self.metric)
            .field("kind", &self.kind())
            .field("live", &self.len())
            .field("tombstones", &self.tombstones)
            .finish()
    }
}

/// Embeds with a timeout and checks the provider honoured its dimension.
pub(crate) async fn embed_text(
    embedder: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, SearchError> {
    let embedding = embed_with_timeout(embedder, text, timeout).await?;
    if let Err(e) = validate_dimension(embedder.dimension(), embedding.len()) {
        warn!(model = embedder.model_id(), "provider returned wrong dimension");
        return Err(e);
    }
    Ok(embedding)
}
