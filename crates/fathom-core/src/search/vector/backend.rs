// ANN structures behind the vector index: exact scan or rust-cv/hnsw graph

use super::super::types::SearchError;
use super::metric::{from_ordered_bits, DistanceMetric, GraphMetric};
use hnsw::{Hnsw, Searcher};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use space::Neighbor;
use std::fmt;
use std::str::FromStr;

/// Minimum ef_search parameter for HNSW queries.
///
/// ef_search controls recall vs speed tradeoff in HNSW search. We use
/// max(candidates * 2, MIN_EF_SEARCH) to scale with the result count while
/// keeping a quality floor.
const MIN_EF_SEARCH: usize = 50;

/// Which ANN structure backs an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndexKind {
    /// Exact linear scan; best for small collections and tests
    Flat,
    /// Hierarchical Navigable Small World graph (M = 16, M0 = 32)
    #[default]
    Hnsw,
}

impl IndexKind {
    /// Stable tag persisted in snapshots.
    pub fn tag(self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Hnsw => "hnsw",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for IndexKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(IndexKind::Flat),
            "hnsw" => Ok(IndexKind::Hnsw),
            other => Err(SearchError::Configuration(format!(
                "unknown index kind '{other}' (expected one of: flat, hnsw)"
            ))),
        }
    }
}

impl TryFrom<String> for IndexKind {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IndexKind> for String {
    fn from(kind: IndexKind) -> Self {
        kind.tag().to_string()
    }
}

/// HNSW graph with its insertion searcher.
///
/// Type parameters: <Metric, Data, RNG, M, M0>
/// - M = 16 bidirectional links per node (paper recommendation)
/// - M0 = 32 links at layer 0 (2*M per standard practice)
///
/// Reference: Malkov & Yashunin (2018), arXiv:1603.09320
pub(crate) struct HnswStructure {
    graph: Hnsw<GraphMetric, Box<[f32]>, StdRng, 16, 32>,
    /// Reused across inserts; queries use a fresh one so search takes `&self`
    searcher: Searcher<u32>,
}

/// An append-only ANN structure.
///
/// Slots are numbered from zero in insertion order and never removed;
/// deletion is tracked one level up as tombstones.
pub(crate) enum AnnStructure {
    Flat {
        metric: DistanceMetric,
        vectors: Vec<Box<[f32]>>,
    },
    Hnsw(Box<HnswStructure>),
}

impl AnnStructure {
    pub(crate) fn new(kind: IndexKind, metric: DistanceMetric) -> Self {
        match kind {
            IndexKind::Flat => AnnStructure::Flat {
                metric,
                vectors: Vec::new(),
            },
            IndexKind::Hnsw => AnnStructure::Hnsw(Box::new(HnswStructure {
                graph: Hnsw::new(GraphMetric(metric)),
                searcher: Searcher::default(),
            })),
        }
    }

    pub(crate) fn kind(&self) -> IndexKind {
        match self {
            AnnStructure::Flat { .. } => IndexKind::Flat,
            AnnStructure::Hnsw(_) => IndexKind::Hnsw,
        }
    }

    /// Appends a vector and returns its slot.
    pub(crate) fn insert(&mut self, embedding: Box<[f32]>) -> usize {
        match self {
            AnnStructure::Flat { vectors, .. } => {
                vectors.push(embedding);
                vectors.len() - 1
            }
            AnnStructure::Hnsw(hnsw) => {
                let HnswStructure { graph, searcher } = hnsw.as_mut();
                graph.insert(embedding, searcher)
            }
        }
    }

    /// Number of slots, tombstoned ones included.
    pub(crate) fn len(&self) -> usize {
        match self {
            AnnStructure::Flat { vectors, .. } => vectors.len(),
            AnnStructure::Hnsw(hnsw) => hnsw.graph.len(),
        }
    }

    /// Stored vector of a slot.
    pub(crate) fn embedding(&self, slot: usize) -> Option<&[f32]> {
        if slot >= self.len() {
            return None;
        }
        let embedding: &[f32] = match self {
            AnnStructure::Flat { vectors, .. } => &vectors[slot],
            AnnStructure::Hnsw(hnsw) => hnsw.graph.feature(slot),
        };
        Some(embedding)
    }

    /// Up to `count` candidate slots nearest to `query`, closest first, as
    /// `(slot, distance)`.
    ///
    /// Exact for `Flat`; approximate for `Hnsw`. Tombstones are not
    /// filtered here.
    pub(crate) fn nearest(&self, query: &[f32], count: usize) -> Vec<(usize, f32)> {
        let count = count.min(self.len());
        if count == 0 {
            return Vec::new();
        }

        match self {
            AnnStructure::Flat { metric, vectors } => {
                let mut scored: Vec<(usize, f32)> = vectors
                    .iter()
                    .enumerate()
                    .map(|(slot, v)| (slot, metric.distance(query, v)))
                    .collect();
                scored.sort_by(|a, b| a.1.total_cmp(&b.1));
                scored.truncate(count);
                scored
            }
            AnnStructure::Hnsw(hnsw) => {
                let mut neighbors = vec![
                    Neighbor {
                        index: !0,
                        distance: !0
                    };
                    count
                ];
                let ef_search = std::cmp::max(count * 2, MIN_EF_SEARCH);
                let query: Box<[f32]> = query.into();
                let mut searcher = Searcher::default();

                hnsw.graph
                    .nearest(&query, ef_search, &mut searcher, &mut neighbors)
                    .iter()
                    .filter(|n| n.index != !0) // Unfilled entries
                    .map(|n| (n.index, from_ordered_bits(n.distance)))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(angle: f32) -> Box<[f32]> {
        vec![angle.cos(), angle.sin()].into_boxed_slice()
    }

    #[test]
    fn test_slots_are_sequential() {
        for kind in [IndexKind::Flat, IndexKind::Hnsw] {
            let mut structure = AnnStructure::new(kind, DistanceMetric::Cosine);
            assert_eq!(structure.insert(unit(0.0)), 0);
            assert_eq!(structure.insert(unit(1.0)), 1);
            assert_eq!(structure.len(), 2);
            assert_eq!(structure.kind(), kind);
        }
    }

    #[test]
    fn test_nearest_agrees_between_backends() {
        let mut flat = AnnStructure::new(IndexKind::Flat, DistanceMetric::Cosine);
        let mut graph = AnnStructure::new(IndexKind::Hnsw, DistanceMetric::Cosine);
        for i in 0..20 {
            let v = unit(i as f32 * 0.15);
            flat.insert(v.clone());
            graph.insert(v);
        }

        let query = [1.0, 0.05];
        let exact: Vec<usize> = flat.nearest(&query, 3).into_iter().map(|(s, _)| s).collect();
        let approx: Vec<usize> = graph.nearest(&query, 3).into_iter().map(|(s, _)| s).collect();
        assert_eq!(exact, vec![0, 1, 2]);
        assert_eq!(approx, exact);
    }

    #[test]
    fn test_hnsw_distances_decode_exactly() {
        let mut graph = AnnStructure::new(IndexKind::Hnsw, DistanceMetric::InnerProduct);
        graph.insert(vec![2.0, 0.0].into_boxed_slice());
        let hits = graph.nearest(&[3.0, 0.0], 1);
        assert_eq!(hits, vec![(0, -6.0)]);
    }

    #[test]
    fn test_embedding_lookup() {
        let mut structure = AnnStructure::new(IndexKind::Hnsw, DistanceMetric::L2);
        structure.insert(vec![1.0, 2.0].into_boxed_slice());
        assert_eq!(structure.embedding(0), Some(&[1.0, 2.0][..]));
        assert_eq!(structure.embedding(1), None);
    }

    #[test]
    fn test_nearest_on_empty_structure() {
        let structure = AnnStructure::new(IndexKind::Hnsw, DistanceMetric::L2);
        assert!(structure.nearest(&[1.0, 0.0], 5).is_empty());
    }
}
