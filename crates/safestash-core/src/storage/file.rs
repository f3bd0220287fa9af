//! File-backed store
//!
//! Keeps every entry in one JSON object on disk and mirrors the browser
//! store's semantics, including an optional byte capacity.
//! Uses atomic writes (write to temp file, then rename) to prevent
//! corruption.
//!
//! Storage location: `<data_dir>/store.json` (configurable via `Config`)

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{check_capacity, total_size, RawStore, StoreFailure};

/// [`RawStore`] persisted to a single JSON file
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    capacity: Option<u64>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries
    ///
    /// A missing file is an empty store. A file that exists but cannot be
    /// read or parsed is an error.
    pub fn open(path: impl Into<PathBuf>, capacity: Option<u64>) -> Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store file {:?}", path))?
        } else {
            BTreeMap::new()
        };

        debug!("Opened file store at {:?} ({} keys)", path, entries.len());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            capacity,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the backing file exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Bytes currently used
    pub fn usage(&self) -> u64 {
        total_size(&self.entries.read())
    }

    fn persist(&self, entries: &BTreeMap<String, String>, key: &str) -> Result<(), StoreFailure> {
        let data = serde_json::to_vec(entries)?;
        atomic_write(&self.path, &data).map_err(|e| {
            warn!("Failed to persist store to {:?}: {}", self.path, e);
            StoreFailure::from_io(&e, key)
        })
    }
}

impl RawStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreFailure> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreFailure> {
        let mut entries = self.entries.write();
        check_capacity(&entries, self.capacity, key, value)?;

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(failure) = self.persist(&entries, key) {
            // Roll back so memory matches disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(failure);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreFailure> {
        let mut entries = self.entries.write();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };

        if let Err(failure) = self.persist(&entries, key) {
            entries.insert(key.to_string(), previous);
            return Err(failure);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreFailure> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// This ensures the target file is never left in a partially-written state.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{detect_error_type, ErrorKind};
    use tempfile::TempDir;

    fn store_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("store.json")
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(store_path(&temp_dir), None).unwrap();

        assert!(!store.exists());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_entries_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = store_path(&temp_dir);

        {
            let store = FileStore::open(&path, None).unwrap();
            store.set_item("tasks", r#"[{"id":"1"}]"#).unwrap();
            store.set_item("temp_import", "x").unwrap();
            store.remove_item("temp_import").unwrap();
            assert!(store.exists());
        }

        let store = FileStore::open(&path, None).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["tasks"]);
        assert_eq!(
            store.get_item("tasks").unwrap().as_deref(),
            Some(r#"[{"id":"1"}]"#)
        );
    }

    #[test]
    fn test_capacity_rejected_write_not_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let path = store_path(&temp_dir);

        let store = FileStore::open(&path, Some(16)).unwrap();
        store.set_item("a", "small").unwrap();

        let err = store.set_item("b", &"x".repeat(32)).unwrap_err();
        assert_eq!(detect_error_type(Some(&err)), ErrorKind::QuotaExceeded);

        let reopened = FileStore::open(&path, Some(16)).unwrap();
        assert!(reopened.get_item("b").unwrap().is_none());
        assert_eq!(reopened.usage(), 6);
    }

    #[test]
    fn test_corrupt_file_fails_to_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = store_path(&temp_dir);
        fs::write(&path, "not json").unwrap();

        let err = FileStore::open(&path, None).err().unwrap();
        assert!(err.to_string().contains("Failed to parse store file"));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir
            .path()
            .join("a")
            .join("b")
            .join("c")
            .join("store.json");

        atomic_write(&nested_path, b"{}").unwrap();

        assert!(nested_path.exists());
        assert!(!nested_path.with_extension("tmp").exists());
        let content = fs::read_to_string(&nested_path).unwrap();
        assert_eq!(content, "{}");
    }
}
