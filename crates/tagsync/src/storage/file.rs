use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{SyncError, SyncResult};
use crate::storage::KvStore;

/// Key-value store persisted as one JSON object on disk.
///
/// The whole object is rewritten on every mutation, through a temporary
/// file renamed over the old one, so readers never see a partial write.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    data: HashMap<String, Value>,
}

impl FileKvStore {
    /// Opens the store at `path`. A missing file starts empty; an unreadable
    /// or corrupt one is an error.
    pub fn open(path: PathBuf) -> SyncResult<Self> {
        let data = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|error| {
                SyncError::Storage(format!(
                    "state file {} is not a JSON object: {error}",
                    path.display()
                ))
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => {
                return Err(SyncError::Storage(format!(
                    "failed to read state file {}: {error}",
                    path.display()
                )))
            }
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> SyncResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|error| {
            SyncError::Storage(format!(
                "failed to create state directory {}: {error}",
                dir.display()
            ))
        })?;
        let serialized = serde_json::to_vec_pretty(&self.data)?;
        let write_error = |error: std::io::Error| {
            SyncError::Storage(format!(
                "failed to write state file {}: {error}",
                self.path.display()
            ))
        };

        let mut staged = NamedTempFile::new_in(dir).map_err(write_error)?;
        staged.write_all(&serialized).map_err(write_error)?;
        staged.as_file().sync_all().map_err(write_error)?;
        staged
            .persist(&self.path)
            .map_err(|error| write_error(error.error))?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> SyncResult<()> {
        validate_key(key)?;
        self.data.insert(key.to_string(), value);
        self.flush()
    }
}

fn validate_key(key: &str) -> SyncResult<()> {
    if key.trim().is_empty() {
        return Err(SyncError::InvalidInput("storage key must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state").join("session.json");

        let mut store = FileKvStore::open(path.clone()).expect("open");
        store.set("searchHistory", json!(["cat", "dog"])).expect("set");
        drop(store);

        let reopened = FileKvStore::open(path).expect("reopen");
        assert_eq!(reopened.get("searchHistory"), Some(json!(["cat", "dog"])));
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().expect("tempdir");
        let store = FileKvStore::open(dir.path().join("absent.json")).expect("open");
        assert!(store.get("searchHistory").is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_is_storage_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"[1, 2").expect("write");
        match FileKvStore::open(path) {
            Err(SyncError::Storage(_)) => {}
            other => panic!("expected storage error, got {other:?}"),
        }
    }

    #[test]
    fn rewrites_replace_the_file_whole() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let mut store = FileKvStore::open(path.clone()).expect("open");
        store.set("a", json!(1)).expect("set");
        store.set("b", json!({ "cat": 4 })).expect("set");
        store.set("a", json!(2)).expect("set");

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("session.json")]);

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(on_disk, json!({ "a": 2, "b": { "cat": 4 } }));
    }

    #[test]
    fn failed_rename_leaves_no_staged_file() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("session.json");
        std::fs::create_dir_all(target.join("occupied")).expect("mkdir");
        let mut store = FileKvStore {
            path: target,
            data: HashMap::new(),
        };

        assert!(matches!(store.set("a", json!(1)), Err(SyncError::Storage(_))));
        let entries = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn blank_key_rejected() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileKvStore::open(dir.path().join("s.json")).expect("open");
        let err = store.set(" ", json!(true)).expect_err("blank key");
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }
}
