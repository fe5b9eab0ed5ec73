// Vector index snapshots and load-time reconciliation

use super::backend::IndexKind;
use super::mapping::IdMapping;
use super::metric::DistanceMetric;
use super::{VectorIndex, VectorSettings};
use crate::config::SNAPSHOT_FORMAT_VERSION;
use crate::embedding::EmbeddingProvider;
use crate::search::snapshot::{check_format_version, read_json, write_json};
use crate::search::types::{DocId, Document, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// On-disk form of a [`VectorIndex`].
#[derive(Serialize, Deserialize)]
struct VectorSnapshot {
    format_version: u32,
    model_id: String,
    dimension: usize,
    metric: String,
    kind: String,
    /// In slot order
    slots: Vec<SlotRecord>,
    tombstones: Vec<usize>,
    mapping: Vec<(usize, DocId)>,
}

#[derive(Serialize, Deserialize)]
struct SlotRecord {
    embedding: Vec<f32>,
    document: Option<Document>,
}

/// What load-time reconciliation had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mapping entries pointing at missing, tombstoned or mismatched slots
    pub pruned_mappings: usize,
    /// Live slots that no mapping entry pointed at; now tombstoned
    pub orphaned_slots: usize,
}

impl ReconcileReport {
    /// True if the snapshot needed no repair.
    pub fn is_clean(&self) -> bool {
        self.pruned_mappings == 0 && self.orphaned_slots == 0
    }
}

impl VectorIndex {
    /// Writes slots, tombstones and the id mapping to `path`.
    #[instrument(skip(self), fields(slots = self.slot_count()))]
    pub fn persist(&self, path: &Path) -> Result<(), SearchError> {
        let slots = (0..self.structure.len())
            .map(|slot| SlotRecord {
                embedding: self
                    .structure
                    .embedding(slot)
                    .map(<[f32]>::to_vec)
                    .unwrap_or_default(),
                document: self.slots.get(slot).cloned().flatten(),
            })
            .collect();
        let tombstones = (0..self.structure.len())
            .filter(|&slot| !self.is_live(slot))
            .collect();

        let snapshot = VectorSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            model_id: self.model_id().to_string(),
            dimension: self.dimension(),
            metric: self.metric.tag().to_string(),
            kind: self.kind().tag().to_string(),
            slots,
            tombstones,
            mapping: self.mapping.entries(),
        };
        write_json(path, &snapshot)?;
        info!(path = %path.display(), live = self.len(), "persisted vector index");
        Ok(())
    }

    /// Loads a snapshot written by [`persist`](Self::persist).
    ///
    /// The snapshot's model id, dimension and metric must match `embedder`
    /// and `settings`; the structure is rebuilt in the configured backend
    /// by re-inserting slots in order, then the mapping is reconciled
    /// against slot liveness.
    ///
    /// # Errors
    ///
    /// [`SearchError::ConfigMismatch`] on any tag mismatch, before any
    /// structure is built.
    #[instrument(skip(embedder))]
    pub fn load(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: VectorSettings,
        embed_timeout: Duration,
    ) -> Result<(Self, ReconcileReport), SearchError> {
        let snapshot: VectorSnapshot = read_json(path)?;
        check_format_version(snapshot.format_version)?;

        if snapshot.model_id != embedder.model_id() {
            return Err(SearchError::ConfigMismatch {
                field: "model_id",
                expected: embedder.model_id().to_string(),
                found: snapshot.model_id,
            });
        }
        if snapshot.dimension != embedder.dimension() {
            return Err(SearchError::ConfigMismatch {
                field: "dimension",
                expected: embedder.dimension().to_string(),
                found: snapshot.dimension.to_string(),
            });
        }
        let metric_matches = snapshot
            .metric
            .parse::<DistanceMetric>()
            .map_or(false, |m| m == settings.metric);
        if !metric_matches {
            return Err(SearchError::ConfigMismatch {
                field: "metric",
                expected: settings.metric.tag().to_string(),
                found: snapshot.metric,
            });
        }
        if snapshot.kind.parse::<IndexKind>().ok() != Some(settings.index_kind) {
            info!(
                stored = %snapshot.kind,
                configured = %settings.index_kind,
                "rebuilding vector snapshot into configured backend"
            );
        }

        let mut index = VectorIndex::new(embedder, settings, embed_timeout);

        let tombstoned: HashSet<usize> = snapshot.tombstones.into_iter().collect();
        for (slot, record) in snapshot.slots.into_iter().enumerate() {
            if record.embedding.len() != snapshot.dimension {
                return Err(SearchError::Persistence(format!(
                    "slot {slot} in {} has {} dimensions, expected {}",
                    path.display(),
                    record.embedding.len(),
                    snapshot.dimension
                )));
            }
            index.structure.insert(record.embedding.into_boxed_slice());
            let document = record.document.filter(|_| !tombstoned.contains(&slot));
            index.slots.push(document);
        }

        let report = index.reconcile(snapshot.mapping);
        if !report.is_clean() {
            warn!(
                pruned_mappings = report.pruned_mappings,
                orphaned_slots = report.orphaned_slots,
                "reconciled inconsistent vector snapshot"
            );
        }
        info!(live = index.len(), tombstones = index.tombstones, "loaded vector index");
        Ok((index, report))
    }

    /// Installs `entries` as the mapping, keeping only entries that point at
    /// a live slot holding the same id, then tombstones unmapped live slots.
    fn reconcile(&mut self, entries: Vec<(usize, DocId)>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.mapping = IdMapping::new();

        for (slot, id) in entries {
            let holds_id = matches!(self.slots.get(slot), Some(Some(doc)) if doc.id == id);
            let already_mapped =
                self.mapping.slot_of(&id).is_some() || self.mapping.doc_of(slot).is_some();
            if holds_id && !already_mapped {
                self.mapping.insert(slot, id);
            } else {
                report.pruned_mappings += 1;
            }
        }

        for slot in 0..self.slots.len() {
            if self.slots[slot].is_some() && self.mapping.doc_of(slot).is_none() {
                self.slots[slot] = None;
                report.orphaned_slots += 1;
            }
        }

        self.tombstones = self.slots.iter().filter(|s| s.is_none()).count();
        report
    }
}
