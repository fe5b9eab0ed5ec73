//! Production configuration.
//!
//! The constants below are the defaults every component falls back to.
//! [`RetrievalConfig`] groups the selectable parts (tokenizer, BM25
//! parameters, vector backend, fusion) into one serializable value that
//! frontends can load from a file and hand to
//! [`RetrievalService`](crate::search::RetrievalService).
//!
//! # Usage
//!
//! ```
//! use fathom_core::config::{RetrievalConfig, DEFAULT_TOP_K};
//!
//! let config = RetrievalConfig::default();
//! assert_eq!(config.fusion.top_k, DEFAULT_TOP_K);
//! assert!(config.validate().is_ok());
//! ```

use crate::embedding::EmbeddingSettings;
use crate::search::fusion::FusionConfig;
use crate::search::lexical::Bm25Params;
use crate::search::tokenizer::TokenizerKind;
use crate::search::vector::VectorSettings;
use crate::search::SearchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Query Defaults
// =============================================================================

/// Number of fused results returned when the caller does not ask for more.
pub const DEFAULT_TOP_K: usize = 4;

/// Each source is asked for `top_k * FETCH_MULTIPLIER` candidates before
/// fusion, so documents ranked just outside one source's window can still
/// be lifted by the other.
pub const FETCH_MULTIPLIER: usize = 2;

// =============================================================================
// BM25 (Okapi) Parameters
// =============================================================================

/// Term-frequency saturation.
pub const BM25_K1: f32 = 1.5;

/// Document-length normalization strength.
pub const BM25_B: f32 = 0.75;

/// Floor for negative IDF values, as a fraction of the mean IDF.
///
/// Terms that occur in more than half the corpus get a negative Okapi IDF;
/// those are replaced with `BM25_EPSILON * mean_idf`.
pub const BM25_EPSILON: f32 = 0.25;

// =============================================================================
// Fusion Defaults
// =============================================================================

/// Default lexical weight for convex-combination fusion.
pub const DEFAULT_LEXICAL_WEIGHT: f32 = 0.4;

/// Default vector weight for convex-combination fusion.
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;

// =============================================================================
// Embedding & Vector Index
// =============================================================================

/// Dimension of the built-in hashing embedder.
pub const HASHING_EMBEDDING_DIM: usize = 256;

/// Upper bound on a single embedding call.
///
/// A timeout surfaces before any structural mutation of the vector index.
pub const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Tombstone ratio above which compaction is advised.
pub const COMPACTION_THRESHOLD: f32 = 0.3;

// =============================================================================
// Lexical Refresh
// =============================================================================

/// Suggested interval for
/// [`spawn_lexical_refresher`](crate::search::RetrievalService::spawn_lexical_refresher).
pub const LEXICAL_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Version stamped into every persisted index snapshot.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Complete configuration of a retrieval service.
///
/// Every field has a production default, so partial config files only need
/// to name what they change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Tokenization strategy for the lexical index
    pub tokenizer: TokenizerKind,
    /// BM25 scoring parameters
    pub bm25: Bm25Params,
    /// Vector backend and distance metric
    pub vector: VectorSettings,
    /// Fusion method, per-source weights and default result count
    pub fusion: FusionConfig,
    /// Embedding provider selection
    pub embedding: EmbeddingSettings,
}

impl RetrievalConfig {
    /// Checks the parts that serde cannot: weights, counts and dimensions.
    pub fn validate(&self) -> Result<(), SearchError> {
        self.bm25.validate()?;
        self.fusion.validate()?;
        self.embedding.validate()?;
        Ok(())
    }
}
