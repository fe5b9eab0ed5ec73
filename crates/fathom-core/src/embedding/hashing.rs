//! Deterministic feature-hashing embedder.
//!
//! Each lowercase word is hashed into one of `dimension` buckets with a
//! hash-derived sign, counts are accumulated and the vector is
//! L2-normalized. Texts sharing vocabulary land close under cosine or inner
//! product; texts with disjoint vocabulary are (nearly) orthogonal. Useful
//! offline and in tests; it captures no semantics beyond word overlap.

use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use xxhash_rust::xxh3::xxh3_64;

/// Feature-hashed bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    /// Creates an embedder producing `dimension`-length vectors.
    ///
    /// A zero dimension is clamped to 1.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-v1-{dimension}"),
        }
    }

    /// Synchronous embedding; the async trait method delegates here.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase);

        for word in words {
            let hash = xxh3_64(word.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // Top bit picks the sign so collisions tend to cancel rather than pile up
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(
            embedder.embed_sync("The quick brown fox"),
            embedder.embed_sync("the QUICK brown fox")
        );
    }

    #[test]
    fn test_unit_length() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.embed_sync("semantic retrieval with hashed features");
        assert!((dot(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed_sync("   ");
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_overlap_scores_higher_than_disjoint() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_sync("rust async runtime");
        let related = embedder.embed_sync("an async runtime for rust programs");
        let unrelated = embedder.embed_sync("banana bread recipe");
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }
}
