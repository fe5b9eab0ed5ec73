// Ensemble sources backed by the service's shared index state

use super::lexical_state::LexicalState;
use crate::embedding::EmbeddingProvider;
use crate::search::ensemble::Retriever;
use crate::search::filter::MetadataFilter;
use crate::search::types::{RetrievalResult, SearchError, SourceKind};
use crate::search::vector::{embed_text, VectorIndex};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Normalized BM25 over the current snapshot, minus stale documents.
pub(super) struct LexicalRetriever {
    pub state: Arc<LexicalState>,
}

#[async_trait]
impl Retriever for LexicalRetriever {
    fn source(&self) -> SourceKind {
        SourceKind::Lexical
    }

    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, SearchError> {
        let view = self.state.view();
        Ok(match view.snapshot {
            Some(index) => index.search_excluding(query, k, filter, &view.excluded),
            None => Vec::new(),
        })
    }
}

/// Embedding similarity over the vector index.
///
/// The query is embedded before the read lock is taken so a slow provider
/// never holds up writers.
pub(super) struct VectorRetriever {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub timeout: Duration,
    pub index: Arc<RwLock<VectorIndex>>,
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn source(&self) -> SourceKind {
        SourceKind::Vector
    }

    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, SearchError> {
        let embedding = embed_text(self.embedder.as_ref(), query, self.timeout).await?;
        let index = self.index.read().await;
        index.search_by_embedding(&embedding, k, filter)
    }
}
