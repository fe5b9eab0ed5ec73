// JSON snapshot files shared by the lexical and vector indices

use super::types::SearchError;
use crate::config::SNAPSHOT_FORMAT_VERSION;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Serializes `value` to `path` through a sibling temp file and a rename,
/// so an interrupted write leaves any previous snapshot intact.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SearchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    let file = File::create(tmp).map_err(|e| io_error("create", tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)
        .map_err(|e| SearchError::Persistence(format!("encode {}: {e}", path.display())))?;
    writer.flush().map_err(|e| io_error("write", tmp, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| io_error("sync", tmp, e))?;
    drop(writer);

    fs::rename(tmp, path).map_err(|e| io_error("rename", path, e))
}

/// Reads a snapshot written by [`write_json`].
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SearchError> {
    let file = File::open(path).map_err(|e| io_error("open", path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SearchError::Persistence(format!("decode {}: {e}", path.display())))
}

/// Rejects snapshots from a newer (or unknown) format.
pub(crate) fn check_format_version(found: u32) -> Result<(), SearchError> {
    if found == SNAPSHOT_FORMAT_VERSION {
        Ok(())
    } else {
        Err(SearchError::ConfigMismatch {
            field: "format_version",
            expected: SNAPSHOT_FORMAT_VERSION.to_string(),
            found: found.to_string(),
        })
    }
}

fn io_error(op: &str, path: &Path, err: std::io::Error) -> SearchError {
    SearchError::Persistence(format!("{op} {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("snap.json");
        write_json(&path, &vec![1u32, 2, 3]).unwrap();
        let back: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(!dir.path().join("nested").join("snap.json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let result: Result<Vec<u32>, _> = read_json(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(SearchError::Persistence(_))));
    }

    #[test]
    fn test_future_format_rejected() {
        assert!(check_format_version(SNAPSHOT_FORMAT_VERSION).is_ok());
        assert!(matches!(
            check_format_version(SNAPSHOT_FORMAT_VERSION + 1),
            Err(SearchError::ConfigMismatch { .. })
        ));
    }
}
