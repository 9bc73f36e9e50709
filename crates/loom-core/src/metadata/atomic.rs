//! Atomic JSON persistence for the lock file and workspace config.
//!
//! A write lands in a named temp file beside the target, is synced, and is
//! then persisted over the target, so a reader sees either the old document
//! or the new one.

use crate::{LoomError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Suffix appended to the file name for the previous copy.
const BACKUP_SUFFIX: &str = ".bak";

fn io_error(action: &str, path: &Path, err: std::io::Error) -> LoomError {
    LoomError::Io {
        message: format!("Failed to {} {}", action, path.display()),
        path: Some(path.to_path_buf()),
        source: Some(err),
    }
}

/// Read and parse a JSON document. A missing file is `Ok(None)`.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error("read", path, e)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| LoomError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
}

/// Replace `path` with the JSON form of `data`.
///
/// With `keep_backup`, an existing document is first copied to
/// `<file name>.bak`; a failed backup is logged and does not stop the write.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| io_error("create directory", parent, e))?;

    let mut serialized = serde_json::to_vec_pretty(data)?;
    serialized.push(b'\n');

    let mut staged =
        NamedTempFile::new_in(parent).map_err(|e| io_error("create temp file in", parent, e))?;
    staged
        .write_all(&serialized)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| io_error("write temp file", staged.path(), e))?;

    if keep_backup && path.exists() {
        let backup = backup_path(path);
        match fs::copy(path, &backup) {
            Ok(_) => debug!("Kept previous copy at {}", backup.display()),
            Err(e) => warn!("Failed to back up {}: {}", path.display(), e),
        }
    }

    staged
        .persist(path)
        .map_err(|e| io_error("replace", path, e.error))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        id: String,
        version: String,
    }

    fn record(version: &str) -> Record {
        Record {
            id: "elixir".into(),
            version: version.into(),
        }
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plugins.lock.json");

        atomic_write_json(&path, &record("1.0.0"), false).unwrap();
        assert_eq!(atomic_read_json(&path).unwrap(), Some(record("1.0.0")));
    }

    #[test]
    fn test_backup_holds_previous_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plugins.lock.json");

        atomic_write_json(&path, &record("1.0.0"), true).unwrap();
        atomic_write_json(&path, &record("2.0.0"), true).unwrap();

        let backup = temp.path().join("plugins.lock.json.bak");
        assert_eq!(atomic_read_json(&backup).unwrap(), Some(record("1.0.0")));
        assert_eq!(atomic_read_json(&path).unwrap(), Some(record("2.0.0")));
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let temp = TempDir::new().unwrap();
        let missing: Option<Record> = atomic_read_json(&temp.path().join("nope.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_malformed_file_is_json_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".loom.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            atomic_read_json::<Record>(&path),
            Err(LoomError::Json { .. })
        ));
    }

    #[test]
    fn test_creates_parent_and_leaves_single_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("home").join("plugins.lock.json");
        atomic_write_json(&path, &serde_json::json!({"version": 1}), false).unwrap();

        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("plugins.lock.json")]);
    }
}
