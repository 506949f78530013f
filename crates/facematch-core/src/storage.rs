use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("snapshot I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Persisted snapshot location. Implementations must be safe to share
/// across threads; callers serialize writes.
pub trait SnapshotStorage: Send + Sync {
    /// Full snapshot bytes, or [`StorageError::NotFound`] if none was written yet.
    fn read_snapshot(&self) -> Result<Vec<u8>, StorageError>;

    /// Replace the stored snapshot.
    fn write_snapshot(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Snapshot stored as a single JSON file, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl SnapshotStorage for FileStorage {
    fn read_snapshot(&self) -> Result<Vec<u8>, StorageError> {
        fs::read(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(self.path.display().to_string()),
            _ => self.io_error(e),
        })
    }

    fn write_snapshot(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        // Write a sibling temp file, then rename over the target.
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp_path).map_err(|e| self.io_error(e))?;
            f.write_all(bytes).map_err(|e| self.io_error(e))?;
            f.sync_all().map_err(|e| self.io_error(e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Snapshot held in memory. Starts empty (reads report `NotFound`).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `bytes`.
    pub fn with_snapshot(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }
}

impl SnapshotStorage for MemoryStorage {
    fn read_snapshot(&self) -> Result<Vec<u8>, StorageError> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StorageError::NotFound(self.location()))
    }

    fn write_snapshot(&self, bytes: &[u8]) -> Result<(), StorageError> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("embeddings.json"));
        assert!(matches!(storage.read_snapshot(), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_file_storage_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("database/embeddings.json"));
        storage.write_snapshot(b"{\"a\": 1}").unwrap();
        assert_eq!(storage.read_snapshot().unwrap(), b"{\"a\": 1}");

        storage.write_snapshot(b"{}").unwrap();
        assert_eq!(storage.read_snapshot().unwrap(), b"{}");
        assert!(!dir.path().join("database/embeddings.json.tmp").exists());
        assert!(storage.path().exists());
        assert_eq!(storage.location(), storage.path().display().to_string());
    }

    #[test]
    fn test_file_storage_write_into_file_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let storage = FileStorage::new(blocker.join("embeddings.json"));
        assert!(matches!(storage.write_snapshot(b"{}"), Err(StorageError::Io { .. })));
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(matches!(storage.read_snapshot(), Err(StorageError::NotFound(_))));
        storage.write_snapshot(b"abc").unwrap();
        assert_eq!(storage.read_snapshot().unwrap(), b"abc");
        assert_eq!(MemoryStorage::with_snapshot(b"x".to_vec()).read_snapshot().unwrap(), b"x");
    }
}
