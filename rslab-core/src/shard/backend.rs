//! Key/value backends behind the shard store.
//!
//! The store addresses every shard and the index by key; a backend only
//! moves bytes. `FsBackend` keeps one file per key and replaces files
//! atomically (write to `.tmp`, rename into place), so a failed write leaves
//! the previous version readable. `MemoryBackend` is for tests and dry runs.

use super::error::StoreError;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub trait ShardBackend: Send + Sync {
    /// Bytes stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the value under `key`. Readers see either the old or the new bytes.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

/// One JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ShardBackend for FsBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| io_error(key, e))?;

        let path = self.path(key);
        let tmp_path = self.root.join(format!("{key}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_error(key, e)
        })?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_error(key, e)
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root.display().to_string(), e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root.display().to_string(), e))?;
            let path = entry.path();
            // Skip leftovers from interrupted writes and anything that isn't JSON
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShardBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_store_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir().join(format!("rslab_backend_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn exercise(backend: &dyn ShardBackend) {
        assert_eq!(backend.get("a.json").unwrap(), None);
        backend.put("b.json", b"{}").unwrap();
        backend.put("a.json", b"[1]").unwrap();
        backend.put("a.json", b"[2]").unwrap();
        assert_eq!(backend.get("a.json").unwrap(), Some(b"[2]".to_vec()));
        assert_eq!(backend.keys().unwrap(), vec!["a.json", "b.json"]);
        backend.delete("a.json").unwrap();
        backend.delete("a.json").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["b.json"]);
    }

    #[test]
    fn memory_backend_contract() {
        exercise(&MemoryBackend::new());
    }

    #[test]
    fn fs_backend_contract() {
        let dir = temp_store_dir();
        exercise(&FsBackend::new(&dir));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn fs_backend_leaves_no_tmp_files() {
        let dir = temp_store_dir();
        let backend = FsBackend::new(&dir);
        backend.put("x.json", b"1").unwrap();
        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["x.json"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn fs_backend_missing_root_has_no_keys() {
        let dir = temp_store_dir();
        assert!(FsBackend::new(&dir).keys().unwrap().is_empty());
    }
}
