//! Error types for embedding providers.
//!
//! Search, index and service failures live in [`crate::search::SearchError`];
//! storage failures in [`crate::storage::StoreError`].

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while producing embeddings.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Provider not available or initialization failed
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    /// The provider did not answer within the configured timeout
    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),
}
