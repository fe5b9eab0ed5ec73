//! Embedding provider abstractions and the built-in provider.
//!
//! ## Core Trait
//!
//! - [`EmbeddingProvider`] - async `embed(text) -> Vec<f32>` with a fixed
//!   dimension and a model identifier that is stamped into vector snapshots
//!
//! ## Implementations
//!
//! - [`HashingEmbedder`] - deterministic feature-hashed bag of words
//!
//! Other providers (remote APIs, local models) plug in by implementing the
//! trait and passing an `Arc<dyn EmbeddingProvider>` to the service.

mod traits;

pub mod config;
pub mod hashing;

pub use config::{build_provider, EmbeddingSettings, ProviderKind};
pub use hashing::HashingEmbedder;
pub use traits::{embed_with_timeout, EmbeddingProvider};
