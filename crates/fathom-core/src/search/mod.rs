//! Hybrid search: BM25 lexical ranking, embedding-based ANN ranking and
//! rank fusion, coordinated by [`RetrievalService`].
//!
//! # Architecture
//!
//! ```text
//! RetrievalService
//!   ├── DocumentStore      (authoritative copy, pending-reindex markers)
//!   ├── VectorIndex        (incremental: id mapping + tombstones)
//!   ├── LexicalIndex       (immutable snapshot, rebuilt and swapped)
//!   └── EnsembleRetriever  (CC or RRF over both sources)
//! ```
//!
//! Mutations write the store first, then the vector index, then mark the
//! lexical snapshot dirty. Documents touched since the last rebuild are
//! excluded from lexical ranking until the next rebuild, so the lexical path
//! is eventually consistent and never returns deleted text.

pub mod ensemble;
pub mod filter;
pub mod fusion;
pub mod lexical;
pub mod service;
pub(crate) mod snapshot;
pub mod tokenizer;
pub mod types;
pub mod vector;

pub use ensemble::{EnsembleOutput, EnsembleRetriever, FusedDocument, Retriever};
pub use filter::MetadataFilter;
pub use fusion::{fuse, FusionConfig, FusionMethod, RRF_K};
pub use lexical::{Bm25Params, LexicalIndex};
pub use service::{MutationOutcome, ReindexReport, RetrievalService, ServiceStats};
pub use tokenizer::{Tokenizer, TokenizerKind};
pub use types::{
    CompactionStats, DocId, Document, Metadata, PartialResultWarning, RetrievalResult,
    SearchError, SearchHit, SearchResponse, SourceKind,
};
pub use vector::{DistanceMetric, IndexKind, ReconcileReport, VectorIndex, VectorSettings};
