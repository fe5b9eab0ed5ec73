//! Traits for embedding operations.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Trait for text embedding providers.
///
/// Providers are shared across tasks behind an `Arc`, so they must be
/// `Send + Sync`. Retries are the caller's responsibility; a provider
/// should fail fast and let the service mark the document for reindexing.
///
/// # Examples
///
/// ```
/// use fathom_core::embedding::{EmbeddingProvider, HashingEmbedder};
///
/// # tokio_test_block(async {
/// let embedder = HashingEmbedder::new(64);
/// let embedding = embedder.embed("hello world").await.unwrap();
/// assert_eq!(embedding.len(), embedder.dimension());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model producing the vectors.
    ///
    /// Vector snapshots record it and refuse to load under a different model.
    fn model_id(&self) -> &str;

    /// Length of every vector returned by [`embed`](Self::embed).
    fn dimension(&self) -> usize;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Runs `provider.embed(text)` bounded by `timeout`.
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, EmbeddingError> {
    match tokio::time::timeout(timeout, provider.embed(text)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(model = provider.model_id(), ?timeout, "embedding timed out");
            Err(EmbeddingError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.0, 1.0])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_as_error() {
        let result = embed_with_timeout(&SlowEmbedder, "text", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(EmbeddingError::Timeout(_))));
    }
}
