//! Ensemble retrieval: query several retrievers concurrently and fuse.
//!
//! Each source is asked for `top_k * FETCH_MULTIPLIER` candidates, the
//! lists are fused with [`fuse`](super::fusion::fuse) and truncated to
//! `top_k`. A failing source does not fail the query: it is recorded in a
//! [`PartialResultWarning`] and the remaining sources are fused. Only when
//! every source fails does the query return
//! [`SearchError::ServiceUnavailable`].

use super::filter::MetadataFilter;
use super::fusion::{fuse, validate_weights, FusionMethod, SourceRanking};
use super::types::{DocId, Document, PartialResultWarning, RetrievalResult, SearchError, SourceKind};
use crate::config::FETCH_MULTIPLIER;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A ranked retrieval source.
///
/// Implementations apply `filter` before ranking, so a narrow filter
/// never starves the result list.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Tag recorded on hits and in partial-result warnings.
    fn source(&self) -> SourceKind;

    /// Up to `k` hits, best first, with scores in `[0, 1]` so they stay
    /// comparable across sources under convex combination.
    async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, SearchError>;
}

/// A fused document with per-source provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedDocument {
    /// The document (copy from the first source that returned it)
    pub document: Document,
    /// Fused score
    pub score: f32,
    /// Each matching source with its own score, in configured order
    pub per_source: Vec<(SourceKind, f32)>,
}

impl FusedDocument {
    /// Score reported by `source`, if it matched.
    pub fn score_from(&self, source: SourceKind) -> Option<f32> {
        self.per_source
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, score)| *score)
    }
}

/// Output of [`EnsembleRetriever::retrieve`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleOutput {
    /// Fused documents, best first
    pub documents: Vec<FusedDocument>,
    /// Present when some sources failed
    pub warning: Option<PartialResultWarning>,
}

/// Weighted fusion over a fixed list of retrievers.
pub struct EnsembleRetriever {
    sources: Vec<(Arc<dyn Retriever>, f32)>,
    method: FusionMethod,
    rrf_k: usize,
}

impl EnsembleRetriever {
    /// Creates an ensemble.
    ///
    /// # Errors
    ///
    /// [`SearchError::Configuration`] if `sources` is empty, any weight is
    /// negative or non-finite, or every weight is zero.
    pub fn new(
        sources: Vec<(Arc<dyn Retriever>, f32)>,
        method: FusionMethod,
        rrf_k: usize,
    ) -> Result<Self, SearchError> {
        let weights: Vec<f32> = sources.iter().map(|(_, w)| *w).collect();
        validate_weights(&weights)?;
        Ok(Self {
            sources,
            method,
            rrf_k,
        })
    }

    /// Fusion method in use.
    pub fn method(&self) -> FusionMethod {
        self.method
    }

    /// Queries every source concurrently and fuses the results.
    #[instrument(skip(self, filter), fields(method = %self.method, sources = self.sources.len()))]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<EnsembleOutput, SearchError> {
        let fetch_k = top_k.saturating_mul(FETCH_MULTIPLIER).max(top_k);

        let outcomes = join_all(
            self.sources
                .iter()
                .map(|(retriever, _)| retriever.retrieve(query, fetch_k, filter)),
        )
        .await;

        let mut failures = Vec::new();
        let mut rankings = Vec::new();
        let mut documents: HashMap<DocId, Document> = HashMap::new();

        for ((retriever, weight), outcome) in self.sources.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => {
                    debug!(source = %retriever.source(), hits = hits.len(), "source returned");
                    let mut ranked = Vec::with_capacity(hits.len());
                    for hit in hits {
                        ranked.push((hit.document.id.clone(), hit.score));
                        documents.entry(hit.document.id.clone()).or_insert(hit.document);
                    }
                    rankings.push(SourceRanking {
                        source: retriever.source(),
                        weight: *weight,
                        hits: ranked,
                    });
                }
                Err(e) => {
                    warn!(source = %retriever.source(), error = %e, "retrieval source failed");
                    failures.push((retriever.source(), e.to_string()));
                }
            }
        }

        if rankings.is_empty() {
            let detail = failures
                .iter()
                .map(|(source, message)| format!("{source}: {message}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SearchError::ServiceUnavailable(detail));
        }

        let fused = fuse(self.method, self.rrf_k, &rankings)
            .into_iter()
            .take(top_k)
            .filter_map(|f| {
                let document = documents.remove(&f.item)?;
                Some(FusedDocument {
                    document,
                    score: f.score,
                    per_source: f.per_source,
                })
            })
            .collect();

        let warning = (!failures.is_empty()).then(|| PartialResultWarning {
            failed_sources: failures,
        });

        Ok(EnsembleOutput {
            documents: fused,
            warning,
        })
    }
}
