// Distance metrics for the vector index and their HNSW adapter

use super::super::types::SearchError;
use serde::{Deserialize, Serialize};
use space::Metric;
use std::fmt;
use std::str::FromStr;

/// Distance metric for an index.
///
/// Internally every metric is a distance (smaller is closer). Scores
/// leaving the index are mapped into `[0, 1]` with higher meaning closer,
/// so they can be mixed with normalized lexical scores:
///
/// - L2: `1 / (1 + d)`
/// - inner product: logistic of the dot product
/// - cosine: `(1 + cos) / 2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DistanceMetric {
    /// Squared Euclidean distance
    L2,
    /// Dot product (pair with normalized embeddings for cosine ranking)
    InnerProduct,
    /// 1 - cosine similarity
    #[default]
    Cosine,
}

impl DistanceMetric {
    /// Stable tag persisted in snapshots.
    pub fn tag(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "inner_product",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Distance between two equal-length vectors; smaller is closer.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(&x, &y)| (x - y) * (x - y))
                .sum(),
            DistanceMetric::InnerProduct => -dot(a, b),
            DistanceMetric::Cosine => {
                let mag_a = dot(a, a).sqrt();
                let mag_b = dot(b, b).sqrt();
                if mag_a == 0.0 || mag_b == 0.0 {
                    // Zero vectors are treated as orthogonal to everything
                    return 1.0;
                }
                1.0 - dot(a, b) / (mag_a * mag_b)
            }
        }
    }

    /// Converts a distance into a higher-is-better score in `[0, 1]`.
    ///
    /// Monotone in the distance, so ranking by score matches ranking by
    /// distance.
    pub fn score(self, distance: f32) -> f32 {
        let score = match self {
            DistanceMetric::L2 => 1.0 / (1.0 + distance.max(0.0)),
            // distance is the negated dot product
            DistanceMetric::InnerProduct => 1.0 / (1.0 + distance.exp()),
            DistanceMetric::Cosine => 1.0 - distance / 2.0,
        };
        score.clamp(0.0, 1.0)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DistanceMetric {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l2" => Ok(DistanceMetric::L2),
            "inner_product" | "ip" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(SearchError::Configuration(format!(
                "unknown distance metric '{other}' (expected one of: l2, inner_product, cosine)"
            ))),
        }
    }
}

impl TryFrom<String> for DistanceMetric {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DistanceMetric> for String {
    fn from(metric: DistanceMetric) -> Self {
        metric.tag().to_string()
    }
}

/// Maps an f32 onto a u32 whose unsigned order matches the float order.
///
/// Negative floats have every bit flipped; non-negative floats get the
/// sign bit set. NaN sorts last.
pub(crate) fn ordered_bits(value: f32) -> u32 {
    if value.is_nan() {
        return u32::MAX;
    }
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Inverse of [`ordered_bits`].
pub(crate) fn from_ordered_bits(key: u32) -> f32 {
    if key & 0x8000_0000 != 0 {
        f32::from_bits(key & 0x7fff_ffff)
    } else {
        f32::from_bits(!key)
    }
}

/// [`space::Metric`] adapter so the HNSW graph can rank by any metric.
///
/// The graph needs an unsigned integer unit; distances go through
/// [`ordered_bits`], which keeps their order exactly, including the
/// negative distances produced by inner product.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphMetric(pub DistanceMetric);

impl Metric<Box<[f32]>> for GraphMetric {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        ordered_bits(self.0.distance(a, b))
    }
}
