// Weighted rank fusion: convex combination (CC) and reciprocal rank fusion (RRF)

use super::types::{SearchError, SourceKind};
use crate::config::{DEFAULT_LEXICAL_WEIGHT, DEFAULT_TOP_K, DEFAULT_VECTOR_WEIGHT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Standard RRF k parameter value from academic literature.
///
/// This constant (60) is the recommended value from the original RRF paper:
/// "Reciprocal Rank Fusion outperforms Condorcet and individual Rank Learning Methods"
/// by Cormack, Clarke, and Buettcher (SIGIR 2009).
///
/// The k parameter controls how much weight is given to top-ranked items:
/// - Smaller k → more emphasis on top results
/// - Larger k → more uniform weighting across ranks
pub const RRF_K: usize = 60;

/// How per-source rankings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FusionMethod {
    /// `sum weight_s * score_s(d)`; sources must score in `[0, 1]` so a
    /// missing item (contributing 0) never outranks a returned one
    #[default]
    ConvexCombination,
    /// `sum weight_s / (k + rank_s(d))`; ignores score magnitudes
    ReciprocalRank,
}

impl FusionMethod {
    /// Stable selector string.
    pub fn tag(self) -> &'static str {
        match self {
            FusionMethod::ConvexCombination => "cc",
            FusionMethod::ReciprocalRank => "rrf",
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for FusionMethod {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cc" => Ok(FusionMethod::ConvexCombination),
            "rrf" => Ok(FusionMethod::ReciprocalRank),
            other => Err(SearchError::Configuration(format!(
                "unknown fusion method '{other}' (expected one of: cc, rrf)"
            ))),
        }
    }
}

impl TryFrom<String> for FusionMethod {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FusionMethod> for String {
    fn from(method: FusionMethod) -> Self {
        method.tag().to_string()
    }
}

/// Fusion section of [`RetrievalConfig`](crate::config::RetrievalConfig).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Fusion method
    pub method: FusionMethod,
    /// RRF k parameter (ignored by CC)
    pub rrf_k: usize,
    /// Weight of the lexical source
    pub lexical_weight: f32,
    /// Weight of the vector source
    pub vector_weight: f32,
    /// Results returned when the caller does not say
    pub top_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::ConvexCombination,
            rrf_k: RRF_K,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl FusionConfig {
    pub(crate) fn validate(&self) -> Result<(), SearchError> {
        validate_weights(&[self.lexical_weight, self.vector_weight])?;
        if self.top_k == 0 {
            return Err(SearchError::Configuration(
                "top_k must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Weights must be finite, non-negative, and not all zero.
pub fn validate_weights(weights: &[f32]) -> Result<(), SearchError> {
    if weights.is_empty() {
        return Err(SearchError::Configuration(
            "at least one retrieval source is required".to_string(),
        ));
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(SearchError::Configuration(format!(
            "fusion weights must be finite and non-negative, got {bad}"
        )));
    }
    if weights.iter().all(|&w| w == 0.0) {
        return Err(SearchError::Configuration(
            "at least one fusion weight must be positive".to_string(),
        ));
    }
    Ok(())
}

/// One source's ranked list, best first.
#[derive(Debug, Clone)]
pub struct SourceRanking<T> {
    /// Which retriever produced the list
    pub source: SourceKind,
    /// Source weight
    pub weight: f32,
    /// `(item, score)` pairs, best first
    pub hits: Vec<(T, f32)>,
}

/// A fused item with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused<T> {
    /// The item
    pub item: T,
    /// Fused score
    pub score: f32,
    /// Each source that returned the item, with its source score, in
    /// configured source order
    pub per_source: Vec<(SourceKind, f32)>,
}

impl<T> Fused<T> {
    /// Number of sources that returned the item.
    pub fn agreement(&self) -> usize {
        self.per_source.len()
    }
}

/// Combines rankings into one list, best first.
///
/// Items missing from a source contribute nothing for that source. Ties
/// are broken by agreement count (more sources first), then by first
/// appearance walking the sources in the given order.
pub fn fuse<T: Clone + Eq + Hash>(
    method: FusionMethod,
    rrf_k: usize,
    rankings: &[SourceRanking<T>],
) -> Vec<Fused<T>> {
    let mut fused: Vec<Fused<T>> = Vec::new();
    let mut position: HashMap<T, usize> = HashMap::new();

    for ranking in rankings {
        for (rank, (item, score)) in ranking.hits.iter().enumerate() {
            let contribution = match method {
                FusionMethod::ConvexCombination => ranking.weight * score,
                FusionMethod::ReciprocalRank => {
                    ranking.weight / (rrf_k as f32 + (rank + 1) as f32) // 1-indexed
                }
            };

            let idx = *position.entry(item.clone()).or_insert_with(|| {
                fused.push(Fused {
                    item: item.clone(),
                    score: 0.0,
                    per_source: Vec::new(),
                });
                fused.len() - 1
            });
            let entry = &mut fused[idx];
            entry.score += contribution;
            entry.per_source.push((ranking.source, *score));
        }
    }

    // Stable: full ties keep first-appearance order
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.agreement().cmp(&a.agreement()))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranking(source: SourceKind, weight: f32, hits: &[(i32, f32)]) -> SourceRanking<i32> {
        SourceRanking {
            source,
            weight,
            hits: hits.to_vec(),
        }
    }

    fn items(fused: &[Fused<i32>]) -> Vec<i32> {
        fused.iter().map(|f| f.item).collect()
    }

    #[test]
    fn test_rrf() {
        let vector = ranking(SourceKind::Vector, 1.0, &[(1, 0.9), (2, 0.8), (3, 0.7)]);
        let lexical = ranking(SourceKind::Lexical, 1.0, &[(3, 10.0), (1, 8.0), (4, 5.0)]);

        let fused = fuse(FusionMethod::ReciprocalRank, RRF_K, &[vector, lexical]);

        // Docs 1 and 3 appear in both lists and should lead
        let top: Vec<i32> = items(&fused).into_iter().take(2).collect();
        assert!(top.contains(&1) && top.contains(&3));
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_rrf_single_ranker_preserves_order() {
        let only = ranking(SourceKind::Lexical, 1.0, &[(1, 10.0), (2, 8.0), (3, 5.0)]);
        let empty = ranking(SourceKind::Vector, 1.0, &[]);
        let fused = fuse(FusionMethod::ReciprocalRank, RRF_K, &[only, empty]);
        assert_eq!(items(&fused), vec![1, 2, 3]);
    }

    #[test]
    fn test_rrf_score_independence() {
        // Ranks only: swapped positions give equal scores
        let a = ranking(SourceKind::Lexical, 1.0, &[(1, 100.0), (2, 0.01)]);
        let b = ranking(SourceKind::Vector, 1.0, &[(2, 0.99), (1, 0.01)]);
        let fused = fuse(FusionMethod::ReciprocalRank, RRF_K, &[a, b]);
        assert!((fused[0].score - fused[1].score).abs() < 1e-6);
        // Full tie resolved by first appearance
        assert_eq!(items(&fused), vec![1, 2]);
    }

    #[test]
    fn test_rrf_weights_scale_contributions() {
        let a = ranking(SourceKind::Lexical, 0.0, &[(1, 1.0)]);
        let b = ranking(SourceKind::Vector, 2.0, &[(2, 1.0)]);
        let fused = fuse(FusionMethod::ReciprocalRank, 60, &[a, b]);
        assert_eq!(items(&fused), vec![2, 1]);
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_cc_weighted_sum() {
        let lexical = ranking(SourceKind::Lexical, 0.4, &[(1, 0.9), (2, 0.1)]);
        let vector = ranking(SourceKind::Vector, 0.6, &[(2, 0.8), (3, 0.5)]);
        let fused = fuse(FusionMethod::ConvexCombination, RRF_K, &[lexical, vector]);

        let score = |id: i32| fused.iter().find(|f| f.item == id).unwrap().score;
        assert!((score(1) - 0.36).abs() < 1e-6);
        assert!((score(2) - (0.04 + 0.48)).abs() < 1e-6);
        assert!((score(3) - 0.30).abs() < 1e-6);
        assert_eq!(items(&fused), vec![2, 1, 3]);
    }

    #[test]
    fn test_ties_prefer_agreement() {
        // Item 2 is matched by both sources and ties item 1 on score
        let lexical = ranking(SourceKind::Lexical, 1.0, &[(1, 0.5), (2, 0.25)]);
        let vector = ranking(SourceKind::Vector, 1.0, &[(2, 0.25)]);
        let fused = fuse(FusionMethod::ConvexCombination, RRF_K, &[lexical, vector]);
        assert_eq!(items(&fused), vec![2, 1]);
        assert_eq!(fused[0].agreement(), 2);
        assert_eq!(
            fused[0].per_source,
            vec![(SourceKind::Lexical, 0.25), (SourceKind::Vector, 0.25)]
        );
    }

    #[test]
    fn test_both_empty() {
        let fused = fuse::<i32>(FusionMethod::ConvexCombination, RRF_K, &[]);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_weight_validation() {
        assert!(validate_weights(&[0.4, 0.6]).is_ok());
        assert!(validate_weights(&[0.0, 1.0]).is_ok());
        assert!(validate_weights(&[]).is_err());
        assert!(validate_weights(&[0.0, 0.0]).is_err());
        assert!(validate_weights(&[-0.1, 1.0]).is_err());
        assert!(validate_weights(&[f32::NAN, 1.0]).is_err());
        assert!(validate_weights(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_method_tags() {
        assert_eq!("rrf".parse::<FusionMethod>().unwrap(), FusionMethod::ReciprocalRank);
        assert!(matches!(
            "borda".parse::<FusionMethod>(),
            Err(SearchError::Configuration(_))
        ));
    }

    proptest! {
        /// Raising one source score of an item never lowers its fused
        /// position relative to any other item.
        #[test]
        fn prop_cc_monotonic(
            lexical in prop::collection::vec(0.0f32..1.0, 1..8),
            vector in prop::collection::vec(0.0f32..1.0, 1..8),
            w_lex in 0.0f32..1.0,
            target in 0usize..8,
            bump in 0.0f32..1.0,
        ) {
            let w_vec = 1.0 - w_lex;
            let target = target % lexical.len();
            let build = |lexical: &[f32]| {
                let lex: Vec<(usize, f32)> = lexical.iter().copied().enumerate().collect();
                let vec: Vec<(usize, f32)> = vector.iter().copied().enumerate().collect();
                fuse(
                    FusionMethod::ConvexCombination,
                    RRF_K,
                    &[
                        SourceRanking { source: SourceKind::Lexical, weight: w_lex, hits: lex },
                        SourceRanking { source: SourceKind::Vector, weight: w_vec, hits: vec },
                    ],
                )
            };

            let before = build(&lexical);
            let mut raised = lexical.clone();
            raised[target] += bump;
            let after = build(&raised);

            let score_of = |fused: &[Fused<usize>], item: usize| {
                fused.iter().find(|f| f.item == item).map(|f| f.score).unwrap_or(0.0)
            };
            let target_before = score_of(&before[..], target);
            let target_after = score_of(&after[..], target);
            prop_assert!(target_after >= target_before);

            for other in &before {
                if other.item == target {
                    continue;
                }
                // Everything strictly below the target stays at or below it
                if other.score < target_before {
                    prop_assert!(score_of(&after[..], other.item) <= target_after);
                }
            }
        }
    }
}
