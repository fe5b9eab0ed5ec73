use crate::error::EmbeddingError;
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Document metadata: flat string key/value pairs.
///
/// Ordered so that serialized snapshots and store records are stable.
pub type Metadata = BTreeMap<String, String>;

/// Stable, caller-assigned document identifier.
///
/// This is the id callers use against the document store. Index-internal
/// slot numbers never leave the index that assigned them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A document: id, searchable text and metadata.
///
/// The document store holds the authoritative copy; both indices keep
/// their own copies so results can be returned without a store round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier
    pub id: DocId,
    /// Text content (tokenized for BM25, embedded for vector search)
    pub text: String,
    /// Filterable metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Creates a document with empty metadata.
    pub fn new(id: impl Into<DocId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Adds one metadata pair, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Which retriever produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// BM25 over the lexical snapshot
    Lexical,
    /// Embedding similarity over the vector index
    Vector,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Lexical => f.write_str("lexical"),
            SourceKind::Vector => f.write_str("vector"),
        }
    }
}

/// A single retriever hit, before fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// The matched document
    pub document: Document,
    /// Source score, higher is better
    pub score: f32,
    /// Retriever that produced the hit
    pub source: SourceKind,
}

/// Fused search hit returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Document identifier
    pub document_id: DocId,
    /// Document text content
    pub text: String,
    /// Document metadata
    pub metadata: Metadata,
    /// Fused relevance score
    pub score: f32,
    /// Sources that returned this document, in configured order
    pub matched_sources: Vec<SourceKind>,
    /// Normalized BM25 score (if the lexical source matched)
    pub lexical_score: Option<f32>,
    /// Similarity in `[0, 1]` (if the vector source matched)
    pub vector_score: Option<f32>,
}

/// Annotation attached to results when some sources failed.
///
/// Not an error: the query succeeded on the remaining sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialResultWarning {
    /// Each failed source with its error message
    pub failed_sources: Vec<(SourceKind, String)>,
}

impl fmt::Display for PartialResultWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partial results; failed sources:")?;
        for (source, message) in &self.failed_sources {
            write!(f, " {source} ({message})")?;
        }
        Ok(())
    }
}

/// Result of [`RetrievalService::search`](super::RetrievalService::search).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Fused hits, best first
    pub hits: Vec<SearchHit>,
    /// Set when at least one source failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<PartialResultWarning>,
}

impl SearchResponse {
    /// True when some sources failed and the hits come from the rest.
    pub fn is_partial(&self) -> bool {
        self.warning.is_some()
    }
}

/// Statistics from a vector index compaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionStats {
    /// Time taken to compact in milliseconds
    pub duration_ms: u64,
    /// Number of tombstoned slots removed
    pub slots_removed: usize,
    /// Tombstone ratio before compaction (0.0 - 1.0)
    pub tombstone_ratio_before: f64,
    /// Tombstone ratio after compaction (should be 0.0)
    pub tombstone_ratio_after: f64,
}

/// Error types for indexing, search and service operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Invalid selector, weight or parameter; raised at construction
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A lexical index cannot be built from zero documents
    #[error("Cannot build an index over an empty corpus")]
    EmptyCorpus,
    /// The document is already present
    #[error("Duplicate document: {0}")]
    DuplicateDocument(DocId),
    /// The document is not present
    #[error("Document not found: {0}")]
    DocumentNotFound(DocId),
    /// A snapshot was written under a different configuration
    #[error("Config mismatch on {field}: snapshot has '{found}', configured '{expected}'")]
    ConfigMismatch {
        /// Which setting differs
        field: &'static str,
        /// Configured value
        expected: String,
        /// Value recorded in the snapshot
        found: String,
    },
    /// Every configured source failed for this query
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Vector dimension mismatch (expected vs actual)
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected embedding dimension
        expected: usize,
        /// Actual embedding dimension received
        actual: usize,
    },
    /// Invalid search query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The id mapping and the ANN structure disagree
    #[error("Index inconsistency: {0}")]
    Inconsistent(String),
    /// Reading or writing a snapshot failed
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Validates that an embedding has the expected dimension.
///
/// Returns `Ok(())` if dimensions match, or `Err(SearchError::DimensionMismatch)` otherwise.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<(), SearchError> {
    if actual == expected {
        Ok(())
    } else {
        Err(SearchError::DimensionMismatch { expected, actual })
    }
}
