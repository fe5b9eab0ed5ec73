//! Document mutations and pending-reindex recovery.
//!
//! Every mutation follows the same order under the write gate:
//!
//! 1. write the document store (authoritative; failure aborts)
//! 2. bring the vector index in line (failure marks the id pending)
//! 3. mark the id stale for lexical ranking

use super::RetrievalService;
use crate::search::filter::MetadataFilter;
use crate::search::types::{DocId, Document, Metadata, SearchError};
use crate::search::vector::embed_text;
use crate::storage::DocumentStore;
use serde::Serialize;
use tracing::{info, instrument, warn};

/// How far a successful mutation got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Stored and vector-indexed
    Indexed,
    /// Stored, but the vector index could not be updated; the document is
    /// marked for [`reindex_pending`](RetrievalService::reindex_pending)
    PendingReindex(String),
}

impl MutationOutcome {
    /// True if the vector index reflects the mutation.
    pub fn is_indexed(&self) -> bool {
        matches!(self, MutationOutcome::Indexed)
    }
}

/// Result of [`RetrievalService::reindex_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    /// Pending documents now indexed
    pub reindexed: usize,
    /// Markers dropped because the document no longer exists
    pub removed: usize,
    /// Documents that failed again and stay pending
    pub still_pending: usize,
}

impl<S: DocumentStore> RetrievalService<S> {
    /// Stores and indexes a new document.
    ///
    /// # Errors
    ///
    /// [`SearchError::DuplicateDocument`] if the store already holds the id;
    /// store failures. Embedding failures are reported through
    /// [`MutationOutcome::PendingReindex`].
    #[instrument(skip_all, fields(doc_id = %document.id))]
    pub async fn add_document(&self, document: Document) -> Result<MutationOutcome, SearchError> {
        let _gate = self.write_gate.lock().await;
        if self.store.get(&document.id).await?.is_some() {
            return Err(SearchError::DuplicateDocument(document.id));
        }

        self.store.put(&document.id, &document).await?;
        let outcome = self.index_or_mark_pending(&document).await?;
        self.lexical.mark_stale(&document.id);
        Ok(outcome)
    }

    /// Replaces a document's text and/or metadata.
    ///
    /// A metadata-only change reuses the stored vector. If the vector index
    /// cannot be updated the old vector is dropped, so searches never
    /// return a version the store no longer holds.
    ///
    /// # Errors
    ///
    /// [`SearchError::DocumentNotFound`] if the store does not hold `id`.
    #[instrument(skip(self, new_text, new_metadata))]
    pub async fn update_document(
        &self,
        id: &DocId,
        new_text: Option<String>,
        new_metadata: Option<Metadata>,
    ) -> Result<MutationOutcome, SearchError> {
        let _gate = self.write_gate.lock().await;
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SearchError::DocumentNotFound(id.clone()))?;

        let updated = Document {
            id: id.clone(),
            text: new_text.unwrap_or(current.text),
            metadata: new_metadata.unwrap_or(current.metadata),
        };
        self.store.put(id, &updated).await?;

        let outcome = self.index_or_mark_pending(&updated).await?;
        if !outcome.is_indexed() {
            self.vector.write().await.delete_document(id);
        }
        self.lexical.mark_stale(id);
        Ok(outcome)
    }

    /// Removes a document from the store and both indices.
    ///
    /// Idempotent: returns false if the document did not exist.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, id: &DocId) -> Result<bool, SearchError> {
        let _gate = self.write_gate.lock().await;
        self.delete_locked(id).await
    }

    /// Deletes every stored document whose metadata matches `filter`.
    ///
    /// An empty filter matches everything. Returns the number deleted.
    #[instrument(skip(self))]
    pub async fn delete_matching(&self, filter: &MetadataFilter) -> Result<usize, SearchError> {
        let _gate = self.write_gate.lock().await;
        let matching = self.store.list(Some(filter)).await?;

        let mut deleted = 0;
        for doc in &matching {
            if self.delete_locked(&doc.id).await? {
                deleted += 1;
            }
        }
        info!(deleted, "deleted matching documents");
        Ok(deleted)
    }

    /// Retries every pending document against the store's current state.
    #[instrument(skip(self))]
    pub async fn reindex_pending(&self) -> Result<ReindexReport, SearchError> {
        let _gate = self.write_gate.lock().await;
        let mut report = ReindexReport::default();

        for id in self.store.list_pending().await? {
            match self.store.get(&id).await? {
                None => {
                    self.vector.write().await.delete_document(&id);
                    self.store.clear_pending(&id).await?;
                    report.removed += 1;
                }
                Some(document) => {
                    if self.index_or_mark_pending(&document).await?.is_indexed() {
                        report.reindexed += 1;
                    } else {
                        report.still_pending += 1;
                    }
                }
            }
        }

        info!(
            reindexed = report.reindexed,
            removed = report.removed,
            still_pending = report.still_pending,
            "reindexed pending documents"
        );
        Ok(report)
    }

    /// Store-and-index half of a delete. Caller holds the write gate.
    async fn delete_locked(&self, id: &DocId) -> Result<bool, SearchError> {
        let existed = self.store.delete(id).await?;
        let was_indexed = self.vector.write().await.delete_document(id);
        self.store.clear_pending(id).await?;

        if existed || was_indexed {
            self.lexical.mark_stale(id);
        }
        Ok(existed)
    }

    /// Makes the vector index hold exactly `document`, marking it pending on
    /// failure and clearing any marker on success. Caller holds the write
    /// gate.
    ///
    /// Store errors while writing the marker are returned; vector errors
    /// become [`MutationOutcome::PendingReindex`].
    pub(super) async fn index_or_mark_pending(
        &self,
        document: &Document,
    ) -> Result<MutationOutcome, SearchError> {
        match self.sync_vector(document).await {
            Ok(()) => {
                self.store.clear_pending(&document.id).await?;
                Ok(MutationOutcome::Indexed)
            }
            Err(e) => {
                warn!(doc_id = %document.id, error = %e, "vector index update failed, marking pending");
                self.store.mark_pending(&document.id).await?;
                Ok(MutationOutcome::PendingReindex(e.to_string()))
            }
        }
    }

    /// Adds or replaces `document` in the vector index.
    ///
    /// Reuses the stored vector when the indexed text is unchanged;
    /// otherwise embeds before taking the write lock.
    async fn sync_vector(&self, document: &Document) -> Result<(), SearchError> {
        let reusable = {
            let index = self.vector.read().await;
            match index.get(&document.id) {
                Some(indexed) if indexed.text == document.text => index.embedding_of(&document.id),
                _ => None,
            }
        };
        let embedding = match reusable {
            Some(embedding) => embedding,
            None => {
                embed_text(
                    self.embedder.as_ref(),
                    &document.text,
                    self.config.embedding.timeout(),
                )
                .await?
            }
        };

        let mut index = self.vector.write().await;
        if index.contains(&document.id) {
            index.apply_update(document.clone(), embedding)
        } else {
            index.add_embedded(document.clone(), embedding)
        }
    }
}
