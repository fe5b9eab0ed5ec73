//! Configuration loading and path resolution for the CLI.
//!
//! Retrieval settings are merged from, lowest to highest precedence:
//! - built-in defaults ([`RetrievalConfig::default`])
//! - `fathom.toml` in the working directory, or the `--config` file
//! - `FATHOM_*` environment variables, with `__` separating nested keys
//!   (`FATHOM_FUSION__TOP_K=8`, `FATHOM_VECTOR__METRIC=l2`)

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use fathom_core::config::RetrievalConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is absent
const CONFIG_FILENAME: &str = "fathom.toml";

/// Prefix of configuration environment variables
const ENV_PREFIX: &str = "FATHOM_";

/// Database file name inside the data directory
const DATABASE_FILENAME: &str = "documents.redb";

/// Snapshot directory name inside the data directory
const INDEX_DIRNAME: &str = "indices";

/// Loads and validates the retrieval configuration.
///
/// An explicit `path` must exist; the default `fathom.toml` is optional.
pub fn load_config(path: Option<&Path>) -> Result<RetrievalConfig> {
    let file = match path {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow!("Config file not found: {}", path.display()));
            }
            path.to_path_buf()
        }
        None => PathBuf::from(CONFIG_FILENAME),
    };

    let config: RetrievalConfig = Figment::new()
        .merge(Toml::file(&file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("Invalid configuration (file: {})", file.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration (file: {})", file.display()))?;
    Ok(config)
}

/// Returns the data directory.
///
/// - macOS: `~/Library/Application Support/dev.fathom.Fathom/`
/// - Linux: `~/.local/share/fathom/`
/// - Windows: `%APPDATA%\fathom\Fathom\data\`
pub fn get_data_dir(custom_dir: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = custom_dir {
        return Ok(dir.clone());
    }

    ProjectDirs::from("dev", "fathom", "Fathom")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine data directory"))
}

/// Returns the path to the database file.
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILENAME)
}

/// Returns the directory holding index snapshots.
pub fn index_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(INDEX_DIRNAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::search::{DistanceMetric, FusionMethod, TokenizerKind};
    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fathom.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let (_dir, path) = write_config(
            r#"
            tokenizer = "char_bigram"

            [fusion]
            method = "rrf"
            top_k = 8
            "#,
        );

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tokenizer, TokenizerKind::CharBigram);
        assert_eq!(config.fusion.method, FusionMethod::ReciprocalRank);
        assert_eq!(config.fusion.top_k, 8);
        assert_eq!(config.vector.metric, DistanceMetric::Cosine);
        assert_eq!(config.bm25, RetrievalConfig::default().bm25);
    }

    #[test]
    fn test_unknown_selector_rejected() {
        let (_dir, path) = write_config(
            r#"
            [vector]
            metric = "manhattan"
            "#,
        );
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let (_dir, path) = write_config(
            r#"
            [fusion]
            lexical_weight = 0.0
            vector_weight = 0.0
            "#,
        );
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("weight"));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = load_config(Some(Path::new("/nonexistent/fathom.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_custom_data_dir() {
        let custom = PathBuf::from("/tmp/custom-data");
        let dir = get_data_dir(Some(&custom)).unwrap();
        assert_eq!(dir, custom);
        assert_eq!(database_path(&dir), custom.join("documents.redb"));
        assert_eq!(index_dir(&dir), custom.join("indices"));
    }
}
