//! Retrieval facade over the document store and both indices.
//!
//! [`RetrievalService`] owns every piece of mutable index state and is the
//! only way to change it:
//!
//! - **Mutations** (`add_document`, `update_document`, `delete_document`)
//!   write the store first, then the vector index, then mark the lexical
//!   snapshot stale. A vector failure after a successful store write is not
//!   an error: the document is marked pending-reindex and
//!   [`reindex_pending`](RetrievalService::reindex_pending) retries it.
//! - **Search** fans out to the lexical and vector sources concurrently and
//!   fuses their rankings. Stale documents are kept out of lexical ranking
//!   until the next rebuild.
//! - **Lexical rebuilds** list the store, build a fresh snapshot on a
//!   blocking worker and swap it in. Drive them explicitly, on demand with
//!   [`rebuild_lexical_if_dirty`](RetrievalService::rebuild_lexical_if_dirty),
//!   or from a background task with
//!   [`spawn_lexical_refresher`](RetrievalService::spawn_lexical_refresher).
//!
//! # Concurrency
//!
//! A single async mutex serializes writers. The vector index sits behind an
//! async `RwLock` so searches proceed concurrently; embeddings are always
//! computed before its write lock is taken. The lexical snapshot is an
//! immutable `Arc` that readers clone and rebuilds replace.

mod lexical_state;
mod mutation;
mod retrievers;


pub use mutation::{MutationOutcome, ReindexReport};

use super::ensemble::{EnsembleRetriever, Retriever};
use super::filter::MetadataFilter;
use super::fusion::FusionMethod;
use super::lexical::LexicalIndex;
use super::tokenizer::{Tokenizer, TokenizerKind};
use super::types::{
    CompactionStats, DocId, Document, SearchError, SearchHit, SearchResponse, SourceKind,
};
use super::vector::{DistanceMetric, IndexKind, ReconcileReport, VectorIndex};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::storage::DocumentStore;
use lexical_state::LexicalState;
use retrievers::{LexicalRetriever, VectorRetriever};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// File name of the vector snapshot inside an index directory.
pub const VECTOR_SNAPSHOT_FILE: &str = "vector.json";

/// File name of the lexical snapshot inside an index directory.
pub const LEXICAL_SNAPSHOT_FILE: &str = "lexical.json";

/// Point-in-time counters for monitoring and the CLI `stats` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    /// Documents in the store
    pub documents: usize,
    /// Stored documents missing from the vector index
    pub pending_reindex: usize,
    /// Live vector entries
    pub vector_live: usize,
    /// Vector slots including tombstones
    pub vector_slots: usize,
    /// Fraction of vector slots that are tombstones
    pub tombstone_ratio: f64,
    /// True once the tombstone ratio passes the compaction threshold
    pub needs_compaction: bool,
    /// Documents in the installed lexical snapshot
    pub lexical_documents: usize,
    /// Documents excluded from lexical ranking until the next rebuild
    pub lexical_stale: usize,
    /// Embedding model
    pub model_id: String,
    /// Embedding dimension
    pub dimension: usize,
    /// ANN backend
    pub index_kind: IndexKind,
    /// Distance metric
    pub metric: DistanceMetric,
    /// Lexical tokenizer
    pub tokenizer: TokenizerKind,
    /// Fusion method
    pub fusion: FusionMethod,
}

/// Hybrid retrieval over a [`DocumentStore`].
pub struct RetrievalService<S: DocumentStore> {
    store: S,
    config: RetrievalConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<RwLock<VectorIndex>>,
    lexical: Arc<LexicalState>,
    /// Serializes every mutation of store and indices
    write_gate: Mutex<()>,
    ensemble: EnsembleRetriever,
}

impl<S: DocumentStore> RetrievalService<S> {
    /// Creates a service with empty indices.
    ///
    /// Documents already in `store` are not indexed; use
    /// [`open`](Self::open) for that.
    ///
    /// # Errors
    ///
    /// [`SearchError::Configuration`] if `config` fails validation.
    pub fn new(
        store: S,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let timeout = config.embedding.timeout();

        let vector = Arc::new(RwLock::new(VectorIndex::new(
            Arc::clone(&embedder),
            config.vector,
            timeout,
        )));
        let lexical = Arc::new(LexicalState::new());

        let lexical_source: Arc<dyn Retriever> = Arc::new(LexicalRetriever {
            state: Arc::clone(&lexical),
        });
        let vector_source: Arc<dyn Retriever> = Arc::new(VectorRetriever {
            embedder: Arc::clone(&embedder),
            timeout,
            index: Arc::clone(&vector),
        });
        let ensemble = EnsembleRetriever::new(
            vec![
                (lexical_source, config.fusion.lexical_weight),
                (vector_source, config.fusion.vector_weight),
            ],
            config.fusion.method,
            config.fusion.rrf_k,
        )?;

        info!(
            model = embedder.model_id(),
            dimension = embedder.dimension(),
            index_kind = %config.vector.index_kind,
            metric = %config.vector.metric,
            tokenizer = %config.tokenizer,
            fusion = %config.fusion.method,
            "created retrieval service"
        );

        Ok(Self {
            store,
            config,
            embedder,
            vector,
            lexical,
            write_gate: Mutex::new(()),
            ensemble,
        })
    }

    /// Creates a service and builds both indices from the store.
    ///
    /// Documents whose embedding fails are marked pending-reindex rather
    /// than failing the open.
    pub async fn open(
        store: S,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Result<Self, SearchError> {
        let service = Self::new(store, embedder, config)?;
        service.rebuild_vectors().await?;
        service.rebuild_lexical().await?;
        Ok(service)
    }

    /// Like [`open`](Self::open), but starts from the snapshots in `dir`
    /// when a vector snapshot exists there.
    pub async fn open_with_snapshots(
        store: S,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
        dir: &Path,
    ) -> Result<Self, SearchError> {
        if !dir.join(VECTOR_SNAPSHOT_FILE).exists() {
            debug!(dir = %dir.display(), "no vector snapshot, building from store");
            return Self::open(store, embedder, config).await;
        }
        let service = Self::new(store, embedder, config)?;
        service.load_indices(dir).await?;
        Ok(service)
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The underlying document store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Searches both sources and fuses the results.
    ///
    /// `filter` is pushed into the vector index and restricts the lexical
    /// corpus before ranking, so every hit matches it.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidQuery`] for an empty query or `top_k == 0`
    /// - [`SearchError::ServiceUnavailable`] if every source failed
    ///
    /// If only some sources fail the response carries a warning instead.
    #[instrument(skip(self, filter), fields(query_len = query.len()))]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<SearchResponse, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "query text cannot be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(SearchError::InvalidQuery(
                "top_k must be greater than 0".to_string(),
            ));
        }

        let output = self.ensemble.retrieve(query, top_k, filter).await?;
        if let Some(warning) = &output.warning {
            warn!(%warning, "serving partial results");
        }

        let hits = output
            .documents
            .into_iter()
            .map(|fused| {
                let lexical_score = fused.score_from(SourceKind::Lexical);
                let vector_score = fused.score_from(SourceKind::Vector);
                let matched_sources = fused.per_source.iter().map(|(s, _)| *s).collect();
                SearchHit {
                    document_id: fused.document.id,
                    text: fused.document.text,
                    metadata: fused.document.metadata,
                    score: fused.score,
                    matched_sources,
                    lexical_score,
                    vector_score,
                }
            })
            .collect::<Vec<_>>();

        debug!(hits = hits.len(), "search complete");
        Ok(SearchResponse {
            hits,
            warning: output.warning,
        })
    }

    /// Fetches a document from the store.
    pub async fn get_document(&self, id: &DocId) -> Result<Option<Document>, SearchError> {
        Ok(self.store.get(id).await?)
    }

    /// Number of stored documents whose metadata matches `filter`.
    pub async fn count_matching(&self, filter: &MetadataFilter) -> Result<usize, SearchError> {
        Ok(self.store.list(Some(filter)).await?.len())
    }

    /// Rebuilds the lexical snapshot from a fresh store listing.
    ///
    /// Exclusions recorded before the listing are cleared when the new
    /// snapshot is installed; mutations that land during the build stay
    /// excluded. Returns the number of documents in the new snapshot.
    #[instrument(skip(self))]
    pub async fn rebuild_lexical(&self) -> Result<usize, SearchError> {
        let (documents, listed_at) = {
            let _gate = self.write_gate.lock().await;
            let listed_at = self.lexical.current_epoch();
            (self.store.list(None).await?, listed_at)
        };
        let count = documents.len();

        let snapshot = if documents.is_empty() {
            None
        } else {
            let kind = self.config.tokenizer;
            let params = self.config.bm25;
            let index = tokio::task::spawn_blocking(move || {
                LexicalIndex::build(documents, Tokenizer::new(kind), params)
            })
            .await
            .map_err(|e| {
                SearchError::ServiceUnavailable(format!("lexical rebuild task failed: {e}"))
            })??;
            Some(Arc::new(index))
        };

        if self.lexical.install(snapshot, listed_at) {
            info!(documents = count, "installed lexical snapshot");
        } else {
            debug!("discarded lexical snapshot superseded by a newer rebuild");
        }
        Ok(count)
    }

    /// Rebuilds only if some document changed since the last rebuild.
    ///
    /// Returns whether a rebuild ran.
    pub async fn rebuild_lexical_if_dirty(&self) -> Result<bool, SearchError> {
        if !self.lexical.is_dirty() {
            return Ok(false);
        }
        self.rebuild_lexical().await?;
        Ok(true)
    }

    /// Reclaims tombstoned vector slots.
    pub async fn compact_vectors(&self) -> Result<CompactionStats, SearchError> {
        let _gate = self.write_gate.lock().await;
        let stats = self.vector.write().await.compact();
        Ok(stats)
    }

    /// Current counters.
    pub async fn stats(&self) -> Result<ServiceStats, SearchError> {
        let documents = self.store.count().await?;
        let pending_reindex = self.store.list_pending().await?.len();
        let lexical_documents = self.lexical.snapshot().map_or(0, |index| index.len());
        let index = self.vector.read().await;

        Ok(ServiceStats {
            documents,
            pending_reindex,
            vector_live: index.len(),
            vector_slots: index.slot_count(),
            tombstone_ratio: index.tombstone_ratio(),
            needs_compaction: index.needs_compaction(),
            lexical_documents,
            lexical_stale: self.lexical.stale_count(),
            model_id: index.model_id().to_string(),
            dimension: index.dimension(),
            index_kind: index.kind(),
            metric: index.metric(),
            tokenizer: self.config.tokenizer,
            fusion: self.ensemble.method(),
        })
    }

    /// Verifies the vector index's id mapping.
    pub async fn check_consistency(&self) -> Result<(), SearchError> {
        self.vector.read().await.check_consistency()
    }

    /// Writes both index snapshots into `dir`.
    ///
    /// A dirty lexical snapshot is rebuilt first so the persisted pair
    /// describes the same corpus.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn persist_indices(&self, dir: &Path) -> Result<(), SearchError> {
        self.rebuild_lexical_if_dirty().await?;

        let _gate = self.write_gate.lock().await;
        self.vector
            .read()
            .await
            .persist(&dir.join(VECTOR_SNAPSHOT_FILE))?;

        let lexical_path = dir.join(LEXICAL_SNAPSHOT_FILE);
        match self.lexical.snapshot() {
            Some(index) => index.persist(&lexical_path)?,
            None => match std::fs::remove_file(&lexical_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SearchError::Persistence(format!(
                        "remove {}: {e}",
                        lexical_path.display()
                    )))
                }
            },
        }
        info!("persisted index snapshots");
        Ok(())
    }

    /// Replaces both indices with the snapshots in `dir`, then brings them
    /// in line with the store.
    ///
    /// Both snapshots are loaded and validated before anything is replaced,
    /// so a [`SearchError::ConfigMismatch`] leaves the service untouched.
    /// Vectors for documents the store no longer holds are dropped;
    /// documents whose vector copy is missing or outdated are re-embedded.
    /// A lexical snapshot that does not match the store is rebuilt.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn load_indices(&self, dir: &Path) -> Result<ReconcileReport, SearchError> {
        let (mut loaded, report) = VectorIndex::load(
            &dir.join(VECTOR_SNAPSHOT_FILE),
            Arc::clone(&self.embedder),
            self.config.vector,
            self.config.embedding.timeout(),
        )?;
        let lexical_path = dir.join(LEXICAL_SNAPSHOT_FILE);
        let lexical = if lexical_path.exists() {
            Some(LexicalIndex::load(&lexical_path, Some(self.config.tokenizer))?)
        } else {
            None
        };

        let gate = self.write_gate.lock().await;
        let documents = self.store.list(None).await?;
        let listed: HashMap<&DocId, &Document> =
            documents.iter().map(|doc| (&doc.id, doc)).collect();

        let orphans: Vec<DocId> = loaded
            .documents()
            .filter(|doc| !listed.contains_key(&doc.id))
            .map(|doc| doc.id.clone())
            .collect();
        for id in &orphans {
            loaded.delete_document(id);
        }
        let outdated: Vec<&Document> = documents
            .iter()
            .filter(|doc| loaded.get(&doc.id) != Some(*doc))
            .collect();
        *self.vector.write().await = loaded;

        for doc in &outdated {
            self.index_or_mark_pending(doc).await?;
        }

        let lexical_current = match &lexical {
            Some(index) => index.documents() == documents.as_slice(),
            None => documents.is_empty(),
        };
        if lexical_current {
            self.lexical
                .install(lexical.map(Arc::new), self.lexical.current_epoch());
        }
        drop(gate);

        info!(
            orphans = orphans.len(),
            resynced = outdated.len(),
            lexical_current,
            "loaded index snapshots"
        );
        if !lexical_current {
            self.rebuild_lexical().await?;
        }
        Ok(report)
    }

    /// Rebuilds the vector index from a full store listing.
    async fn rebuild_vectors(&self) -> Result<(), SearchError> {
        let _gate = self.write_gate.lock().await;
        let documents = self.store.list(None).await?;
        let pending: HashSet<DocId> = self.store.list_pending().await?.into_iter().collect();

        let mut fresh = VectorIndex::new(
            Arc::clone(&self.embedder),
            self.config.vector,
            self.config.embedding.timeout(),
        );
        let mut failed = 0usize;
        let mut listed = HashSet::with_capacity(documents.len());

        for doc in documents {
            let id = doc.id.clone();
            listed.insert(id.clone());
            let indexed = match fresh.embed(&doc.text).await {
                Ok(embedding) => fresh.add_embedded(doc, embedding),
                Err(e) => Err(e),
            };
            match indexed {
                Ok(()) if pending.contains(&id) => self.store.clear_pending(&id).await?,
                Ok(()) => {}
                Err(e) => {
                    warn!(doc_id = %id, error = %e, "could not index stored document");
                    self.store.mark_pending(&id).await?;
                    failed += 1;
                }
            }
        }
        for id in pending.difference(&listed) {
            self.store.clear_pending(id).await?;
        }

        info!(live = fresh.len(), failed, "built vector index from store");
        *self.vector.write().await = fresh;
        Ok(())
    }
}

impl<S: DocumentStore + 'static> RetrievalService<S> {
    /// Spawns a task that calls
    /// [`rebuild_lexical_if_dirty`](Self::rebuild_lexical_if_dirty) every
    /// `interval` ([`LEXICAL_REFRESH_INTERVAL`](crate::config::LEXICAL_REFRESH_INTERVAL)
    /// suits most workloads).
    ///
    /// The task holds only a weak reference and exits once the service is
    /// dropped. Rebuild failures are logged and retried on the next tick.
    pub fn spawn_lexical_refresher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    debug!("retrieval service dropped, stopping lexical refresher");
                    break;
                };
                if let Err(e) = service.rebuild_lexical_if_dirty().await {
                    warn!(error = %e, "background lexical rebuild failed");
                }
            }
        })
    }
}
