//! Document store trait: the authoritative copy of every document.
//!
//! The retrieval service writes here first and treats both indices as
//! derived state. Besides documents, the store keeps the set of
//! pending-reindex markers so a failed vector mutation survives a restart.

use crate::search::filter::MetadataFilter;
use crate::search::types::{DocId, Document};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Database error (redb)
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Key-value document store consumed by the retrieval service.
///
/// # Design Notes
///
/// - No transaction primitives exposed. Each operation is self-contained.
/// - `list` returns documents in first-insertion order. Overwriting an
///   existing id keeps its position, so lexical rebuilds rank ties the same
///   way across restarts.
/// - Pending markers are independent of documents: deleting a document does
///   not clear its marker, the caller does.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Retrieves a document by id.
    ///
    /// Returns `Ok(None)` if the document doesn't exist.
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError>;

    /// Stores a document under `id`, overwriting any existing copy.
    async fn put(&self, id: &DocId, document: &Document) -> Result<(), StoreError>;

    /// Deletes a document.
    ///
    /// Returns `Ok(false)` if it didn't exist.
    async fn delete(&self, id: &DocId) -> Result<bool, StoreError>;

    /// Lists documents in insertion order, optionally restricted to those
    /// whose metadata matches `filter`.
    async fn list(&self, filter: Option<&MetadataFilter>) -> Result<Vec<Document>, StoreError>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Records that `id` is stored but missing from the vector index.
    async fn mark_pending(&self, id: &DocId) -> Result<(), StoreError>;

    /// Removes a pending marker. No-op if absent.
    async fn clear_pending(&self, id: &DocId) -> Result<(), StoreError>;

    /// Ids with a pending marker, sorted.
    async fn list_pending(&self) -> Result<Vec<DocId>, StoreError>;
}

#[async_trait::async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError> {
        (**self).get(id).await
    }

    async fn put(&self, id: &DocId, document: &Document) -> Result<(), StoreError> {
        (**self).put(id, document).await
    }

    async fn delete(&self, id: &DocId) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }

    async fn list(&self, filter: Option<&MetadataFilter>) -> Result<Vec<Document>, StoreError> {
        (**self).list(filter).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        (**self).count().await
    }

    async fn mark_pending(&self, id: &DocId) -> Result<(), StoreError> {
        (**self).mark_pending(id).await
    }

    async fn clear_pending(&self, id: &DocId) -> Result<(), StoreError> {
        (**self).clear_pending(id).await
    }

    async fn list_pending(&self) -> Result<Vec<DocId>, StoreError> {
        (**self).list_pending().await
    }
}

/// In-memory document store for testing.
///
/// Stores all data in HashMaps. Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// id -> (insertion sequence, document)
    documents: HashMap<DocId, (u64, Document)>,
    next_seq: u64,
    pending: BTreeSet<DocId>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::DatabaseError(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::DatabaseError(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError> {
        Ok(self.read()?.documents.get(id).map(|(_, doc)| doc.clone()))
    }

    async fn put(&self, id: &DocId, document: &Document) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let seq = match inner.documents.get(id) {
            Some((seq, _)) => *seq,
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                seq
            }
        };
        inner.documents.insert(id.clone(), (seq, document.clone()));
        Ok(())
    }

    async fn delete(&self, id: &DocId) -> Result<bool, StoreError> {
        Ok(self.write()?.documents.remove(id).is_some())
    }

    async fn list(&self, filter: Option<&MetadataFilter>) -> Result<Vec<Document>, StoreError> {
        let inner = self.read()?;
        let mut entries: Vec<&(u64, Document)> = inner
            .documents
            .values()
            .filter(|(_, doc)| filter.map_or(true, |f| f.matches(&doc.metadata)))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.documents.len())
    }

    async fn mark_pending(&self, id: &DocId) -> Result<(), StoreError> {
        self.write()?.pending.insert(id.clone());
        Ok(())
    }

    async fn clear_pending(&self, id: &DocId) -> Result<(), StoreError> {
        self.write()?.pending.remove(id);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<DocId>, StoreError> {
        Ok(self.read()?.pending.iter().cloned().collect())
    }
}
