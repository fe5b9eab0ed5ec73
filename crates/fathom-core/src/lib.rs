//! # Fathom Core
//!
//! Hybrid retrieval over a mutable document collection: a BM25 lexical
//! index and an embedding-based ANN index are kept in step with an
//! authoritative document store, and their rankings are fused into a
//! single result list.
//!
//! ## Modules
//!
//! - [`search`] - Tokenizers, BM25 index, vector index, rank fusion and the
//!   [`RetrievalService`](search::RetrievalService) facade
//! - [`storage`] - Async document store trait with in-memory and redb backends
//! - [`embedding`] - Embedding provider trait and the built-in hashing provider
//! - [`config`] - Production defaults and the serializable [`RetrievalConfig`](config::RetrievalConfig)
//! - [`error`] - Error types for embedding providers

pub mod config;
pub mod embedding;
pub mod error;
pub mod search;
pub mod storage;

pub use config::RetrievalConfig;
pub use search::{
    DocId, Document, MetadataFilter, RetrievalService, SearchError, SearchHit, SearchResponse,
};
pub use storage::{DocumentStore, InMemoryDocumentStore, StoreError};
