//! Redb-backed document store.
//!
//! Uses [redb](https://github.com/cberner/redb) - a pure Rust, ACID-compliant,
//! embedded B-tree database.
//!
//! # Tables
//!
//! - `documents`: doc id (string) -> StoredDocument (JSON)
//! - `pending`: doc id (string) -> marker byte
//! - `metadata`: key (string) -> u64 counter (next insertion sequence)

use super::{DocumentStore, StoreError};
use crate::search::filter::MetadataFilter;
use crate::search::types::{DocId, Document};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const DOCUMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const PENDING_TABLE: TableDefinition<&str, u8> = TableDefinition::new("pending");
const METADATA_TABLE: TableDefinition<&str, u64> = TableDefinition::new("metadata");

// Metadata keys
const NEXT_SEQ_KEY: &str = "next_seq";

/// A document plus its first-insertion sequence number.
#[derive(Serialize, Deserialize)]
struct StoredDocument {
    seq: u64,
    document: Document,
}

/// Redb-backed document store.
///
/// All operations are ACID-compliant; each runs in its own transaction.
///
/// # Example
///
/// ```ignore
/// use fathom_core::storage::RedbDocumentStore;
///
/// let store = RedbDocumentStore::open("./data/documents.redb")?;
/// store.put(&doc.id, &doc).await?;
/// ```
pub struct RedbDocumentStore {
    db: Arc<Database>,
}

impl RedbDocumentStore {
    /// Opens or creates a redb database at the given path.
    ///
    /// Creates the database file and all required tables if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| StoreError::DatabaseError(format!("Failed to open database: {}", e)))?;

        {
            let write_txn = db.begin_write().map_err(|e| {
                StoreError::DatabaseError(format!("Failed to begin write transaction: {}", e))
            })?;

            write_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to create documents table: {}", e))
            })?;
            write_txn.open_table(PENDING_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to create pending table: {}", e))
            })?;
            write_txn.open_table(METADATA_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to create metadata table: {}", e))
            })?;

            write_txn.commit().map_err(|e| {
                StoreError::DatabaseError(format!("Failed to commit table creation: {}", e))
            })?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    fn serialize_document(stored: &StoredDocument) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(stored).map_err(|e| {
            StoreError::SerializationError(format!("Failed to serialize document: {}", e))
        })
    }

    fn deserialize_document(bytes: &[u8]) -> Result<StoredDocument, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            StoreError::SerializationError(format!("Failed to deserialize document: {}", e))
        })
    }

    fn begin_read(&self) -> Result<redb::ReadTransaction, StoreError> {
        self.db.begin_read().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin read transaction: {}", e))
        })
    }

    fn begin_write(&self) -> Result<redb::WriteTransaction, StoreError> {
        self.db.begin_write().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin write transaction: {}", e))
        })
    }
}

#[async_trait::async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn get(&self, id: &DocId) -> Result<Option<Document>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to open documents table: {}", e))
        })?;

        match table.get(id.as_str()) {
            Ok(Some(guard)) => Ok(Some(Self::deserialize_document(guard.value())?.document)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::DatabaseError(format!(
                "Failed to get document: {}",
                e
            ))),
        }
    }

    async fn put(&self, id: &DocId, document: &Document) -> Result<(), StoreError> {
        let write_txn = self.begin_write()?;
        {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to open documents table: {}", e))
            })?;
            let mut metadata = write_txn.open_table(METADATA_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to open metadata table: {}", e))
            })?;

            let existing_seq = documents
                .get(id.as_str())
                .map_err(|e| StoreError::DatabaseError(format!("Failed to get document: {}", e)))?
                .map(|guard| Self::deserialize_document(guard.value()).map(|s| s.seq))
                .transpose()?;

            let seq = match existing_seq {
                Some(seq) => seq,
                None => {
                    let next = metadata
                        .get(NEXT_SEQ_KEY)
                        .map_err(|e| {
                            StoreError::DatabaseError(format!("Failed to read sequence: {}", e))
                        })?
                        .map(|guard| guard.value())
                        .unwrap_or(0);
                    metadata.insert(NEXT_SEQ_KEY, next + 1).map_err(|e| {
                        StoreError::DatabaseError(format!("Failed to advance sequence: {}", e))
                    })?;
                    next
                }
            };

            let bytes = Self::serialize_document(&StoredDocument {
                seq,
                document: document.clone(),
            })?;
            documents
                .insert(id.as_str(), bytes.as_slice())
                .map_err(|e| {
                    StoreError::DatabaseError(format!("Failed to insert document: {}", e))
                })?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit document: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, id: &DocId) -> Result<bool, StoreError> {
        let write_txn = self.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to open documents table: {}", e))
            })?;
            let removed = table.remove(id.as_str()).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to delete document: {}", e))
            })?;
            removed.is_some()
        };
        write_txn
            .commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit delete: {}", e)))?;

        Ok(existed)
    }

    async fn list(&self, filter: Option<&MetadataFilter>) -> Result<Vec<Document>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to open documents table: {}", e))
        })?;

        let iter = table.iter().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to iterate documents: {}", e))
        })?;

        let mut stored = Vec::new();
        for result in iter {
            let (_, value) = result.map_err(|e| {
                StoreError::DatabaseError(format!("Failed to read document entry: {}", e))
            })?;
            let record = Self::deserialize_document(value.value())?;
            if filter.map_or(true, |f| f.matches(&record.document.metadata)) {
                stored.push(record);
            }
        }

        stored.sort_by_key(|record| record.seq);
        Ok(stored.into_iter().map(|record| record.document).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to open documents table: {}", e))
        })?;

        let count = table.len().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to get document count: {}", e))
        })?;

        Ok(count as usize)
    }

    async fn mark_pending(&self, id: &DocId) -> Result<(), StoreError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to open pending table: {}", e))
            })?;
            table.insert(id.as_str(), 1u8).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to mark pending: {}", e))
            })?;
        }
        write_txn.commit().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to commit pending marker: {}", e))
        })?;

        Ok(())
    }

    async fn clear_pending(&self, id: &DocId) -> Result<(), StoreError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to open pending table: {}", e))
            })?;
            table.remove(id.as_str()).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to clear pending: {}", e))
            })?;
        }
        write_txn.commit().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to commit pending removal: {}", e))
        })?;

        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<DocId>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PENDING_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to open pending table: {}", e))
        })?;

        let iter = table.iter().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to iterate pending: {}", e))
        })?;

        let mut pending = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(|e| {
                StoreError::DatabaseError(format!("Failed to read pending entry: {}", e))
            })?;
            pending.push(DocId::from(key.value()));
        }

        // redb iterates keys in order already
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RedbDocumentStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let store = RedbDocumentStore::open(&db_path).unwrap();
        (store, temp_dir)
    }

    fn make_test_doc(id: &str, text: &str) -> Document {
        Document::new(id, text).with_metadata("source", "test.txt")
    }

    #[tokio::test]
    async fn test_document_crud() {
        let (store, _temp) = create_test_store();
        let id = DocId::from("doc-1");

        // Initially empty
        assert!(store.get(&id).await.unwrap().is_none());

        // Put and get
        store.put(&id, &make_test_doc("doc-1", "Hello world")).await.unwrap();
        let retrieved = store.get(&id).await.unwrap().unwrap();
        assert_eq!(retrieved.text, "Hello world");
        assert_eq!(retrieved.metadata.get("source").unwrap(), "test.txt");

        // Delete
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_in_insertion_order() {
        let (store, _temp) = create_test_store();

        // Keys sort differently from insertion order
        for id in ["zeta", "alpha", "mid"] {
            store.put(&DocId::from(id), &make_test_doc(id, "v1")).await.unwrap();
        }
        store
            .put(&DocId::from("zeta"), &make_test_doc("zeta", "v2"))
            .await
            .unwrap();

        let listed = store.list(None).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(listed[0].text, "v2");
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (store, _temp) = create_test_store();
        let a = Document::new("a", "one").with_metadata("tenant", "x");
        let b = Document::new("b", "two").with_metadata("tenant", "y");
        store.put(&a.id, &a).await.unwrap();
        store.put(&b.id, &b).await.unwrap();

        let filter = MetadataFilter::new().with("tenant", "y");
        let listed = store.list(Some(&filter)).await.unwrap();
        assert_eq!(listed, vec![b]);
    }

    #[tokio::test]
    async fn test_pending_markers() {
        let (store, _temp) = create_test_store();
        store.mark_pending(&DocId::from("b")).await.unwrap();
        store.mark_pending(&DocId::from("a")).await.unwrap();

        assert_eq!(
            store.list_pending().await.unwrap(),
            vec![DocId::from("a"), DocId::from("b")]
        );

        store.clear_pending(&DocId::from("b")).await.unwrap();
        assert_eq!(store.list_pending().await.unwrap(), vec![DocId::from("a")]);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let store = RedbDocumentStore::open(&db_path).unwrap();
            store
                .put(&DocId::from("first"), &make_test_doc("first", "one"))
                .await
                .unwrap();
            store.mark_pending(&DocId::from("first")).await.unwrap();
        }

        let store = RedbDocumentStore::open(&db_path).unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.list_pending().await.unwrap(), vec![DocId::from("first")]);

        // Sequence survives reopen: new documents list after old ones
        store
            .put(&DocId::from("another"), &make_test_doc("another", "two"))
            .await
            .unwrap();
        let ids: Vec<String> = store
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["first", "another"]);
    }
}
