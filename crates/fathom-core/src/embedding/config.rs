//! Provider selection.
//!
//! Providers are a closed set of named strategies resolved once, when the
//! service is built. Custom providers bypass this and are passed to the
//! service directly.

use super::{EmbeddingProvider, HashingEmbedder};
use crate::config::{EMBED_TIMEOUT, HASHING_EMBEDDING_DIM};
use crate::search::SearchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Built-in embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKind {
    /// [`HashingEmbedder`]
    #[default]
    Hashing,
}

impl ProviderKind {
    /// Stable selector string.
    pub fn tag(self) -> &'static str {
        match self {
            ProviderKind::Hashing => "hashing",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ProviderKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hashing" => Ok(ProviderKind::Hashing),
            other => Err(SearchError::Configuration(format!(
                "unknown embedding provider '{other}' (expected: hashing)"
            ))),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.tag().to_string()
    }
}

/// Embedding section of [`RetrievalConfig`](crate::config::RetrievalConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Which built-in provider to construct
    pub provider: ProviderKind,
    /// Output dimension of the provider
    pub dimension: usize,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Hashing,
            dimension: HASHING_EMBEDDING_DIM,
            timeout_ms: EMBED_TIMEOUT.as_millis() as u64,
        }
    }
}

impl EmbeddingSettings {
    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), SearchError> {
        if self.dimension == 0 {
            return Err(SearchError::Configuration(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(SearchError::Configuration(
                "embedding timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Constructs the provider named by `settings`.
pub fn build_provider(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingProvider>, SearchError> {
    settings.validate()?;
    match settings.provider {
        ProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(settings.dimension))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let err = "openai".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, SearchError::Configuration(_)));
    }

    #[test]
    fn test_build_hashing_provider() {
        let settings = EmbeddingSettings {
            dimension: 32,
            ..Default::default()
        };
        let provider = build_provider(&settings).unwrap();
        assert_eq!(provider.dimension(), 32);
        assert_eq!(provider.model_id(), "hashing-v1-32");
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let settings = EmbeddingSettings {
            dimension: 0,
            ..Default::default()
        };
        assert!(build_provider(&settings).is_err());
    }
}
