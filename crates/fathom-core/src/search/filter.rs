// Exact-match metadata filters

use super::types::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Conjunction of exact `key = value` metadata constraints.
///
/// A document matches when every pair is present in its metadata with the
/// same value. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    required: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required pair, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required.insert(key.into(), value.into());
        self
    }

    /// Parses `key=value`, as accepted on the command line.
    pub fn parse_pair(pair: &str) -> Option<(String, String)> {
        let (key, value) = pair.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some((key.to_string(), value.trim().to_string()))
    }

    /// True if `metadata` satisfies every constraint.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.required
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }

    /// True if the filter has no constraints.
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Iterates the required pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.required.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for MetadataFilter {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            required: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(MetadataFilter::new().matches(&Metadata::new()));
    }

    #[test]
    fn test_all_pairs_required() {
        let filter = MetadataFilter::new()
            .with("company", "X")
            .with("lang", "en");
        assert!(filter.matches(&meta(&[("company", "X"), ("lang", "en"), ("year", "2024")])));
        assert!(!filter.matches(&meta(&[("company", "X")])));
        assert!(!filter.matches(&meta(&[("company", "Y"), ("lang", "en")])));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            MetadataFilter::parse_pair("company = X"),
            Some(("company".to_string(), "X".to_string()))
        );
        assert_eq!(
            MetadataFilter::parse_pair("url=a=b"),
            Some(("url".to_string(), "a=b".to_string()))
        );
        assert_eq!(MetadataFilter::parse_pair("novalue"), None);
        assert_eq!(MetadataFilter::parse_pair("=x"), None);
    }
}
