//! Whole-file JSON records with atomic replacement.
//!
//! Writers serialize the full document to a sibling temp file, fsync it,
//! and rename it over the target. Readers fail open: a missing or
//! unreadable record is treated as empty so the worst outcome of damage
//! is redundant reprocessing, never a silent skip.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Sibling temp path used while a record is being replaced.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `bytes`.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Atomically replace `path` with the pretty-printed JSON of `value`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &json)
}

/// Read a JSON record, returning `T::default()` if it is missing or damaged.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable record, treating as empty");
            return T::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt record, treating as empty");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/record.json");
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1u32);

        write_json_atomic(&path, &map).unwrap();
        let back: BTreeMap<String, u32> = read_json_or_default(&path);

        assert_eq!(back, map);
        assert!(!temp_path(&path).exists(), "temp file must be renamed away");
    }

    #[test]
    fn missing_record_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let back: Vec<String> = read_json_or_default(&dir.path().join("absent.json"));
        assert!(back.is_empty());
    }

    #[test]
    fn corrupt_record_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        fs::write(&path, b"{ truncated").unwrap();

        let back: BTreeMap<String, u32> = read_json_or_default(&path);
        assert!(back.is_empty());
    }

    #[test]
    fn stale_temp_file_does_not_shadow_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        // simulate a crash after the temp write but before the rename
        fs::write(temp_path(&path), b"[9").unwrap();

        let back: Vec<i32> = read_json_or_default(&path);
        assert_eq!(back, [1, 2, 3]);

        write_json_atomic(&path, &vec![4]).unwrap();
        let back: Vec<i32> = read_json_or_default(&path);
        assert_eq!(back, [4]);
    }

    #[test]
    fn temp_path_is_sibling() {
        assert_eq!(
            temp_path(Path::new("/x/.progress.json")),
            PathBuf::from("/x/.progress.json.tmp")
        );
    }
}
