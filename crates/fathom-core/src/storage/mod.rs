//! Document storage for the retrieval service.
//!
//! The [`DocumentStore`] is the source of truth: the lexical and vector
//! indices are derived from it and can always be rebuilt from a full
//! listing.
//!
//! # Implementations
//!
//! - [`InMemoryDocumentStore`] - volatile store for tests and embedding
//! - `RedbDocumentStore` - on-disk store (feature `redb-store`)

mod document_store;

#[cfg(feature = "redb-store")]
mod redb_store;

pub use document_store::{DocumentStore, InMemoryDocumentStore, StoreError};

#[cfg(feature = "redb-store")]
pub use redb_store::RedbDocumentStore;
