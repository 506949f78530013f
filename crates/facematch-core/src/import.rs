//! Offline batch import: build a registry from a directory of ID photos.
//!
//! Unlike [`EmbeddingStore::load`], this path is best-effort. A photo that
//! cannot be read, has no detectable face, or yields an unusable embedding is
//! logged, recorded in the report, and skipped.

use crate::capture::CapturePipeline;
use crate::config::MatcherConfig;
use crate::similarity;
use crate::storage::{SnapshotStorage, StorageError};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::IdentityRecord;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as ID photos (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("cannot read ID directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{found} ID photos found but none produced an embedding")]
    NothingImported { found: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A photo that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportFailure {
    pub file: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct ImportReport {
    pub store: EmbeddingStore,
    /// Number of candidate photos found.
    pub found: usize,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.store.len()
    }

    /// Persist the imported registry.
    ///
    /// An empty directory writes an empty snapshot; a directory whose photos
    /// all failed writes nothing and returns [`ImportError::NothingImported`].
    pub fn write(&self, storage: &dyn SnapshotStorage) -> Result<(), ImportError> {
        if self.found > 0 && self.store.is_empty() {
            return Err(ImportError::NothingImported { found: self.found });
        }
        let bytes = self.store.to_snapshot().to_vec_pretty()?;
        storage.write_snapshot(&bytes)?;
        tracing::info!(
            imported = self.imported(),
            found = self.found,
            snapshot = %storage.location(),
            "embeddings saved"
        );
        Ok(())
    }
}

/// Candidate photos in `dir`, sorted by file name.
pub fn list_photos(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut photos = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            photos.push(path);
        }
    }
    photos.sort();
    Ok(photos)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

/// Run every photo in `dir` through `pipeline` and collect the results.
///
/// The identity name is the file stem. Embeddings are L2-normalized before
/// storage. A missing directory is created and treated as empty.
pub fn import_directory(
    pipeline: &mut dyn CapturePipeline,
    dir: &Path,
    config: &MatcherConfig,
) -> Result<ImportReport, ImportError> {
    let dir_error = |source| ImportError::Directory {
        path: dir.display().to_string(),
        source,
    };

    if !dir.exists() {
        tracing::warn!(path = %dir.display(), "ID directory not found; creating it");
        fs::create_dir_all(dir).map_err(dir_error)?;
    }

    let photos = list_photos(dir).map_err(dir_error)?;
    tracing::info!(count = photos.len(), path = %dir.display(), "found ID photos");

    let mut store = EmbeddingStore::new(config);
    store.set_created_from(dir.display().to_string());
    let mut failures = Vec::new();

    for (i, path) in photos.iter().enumerate() {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::debug!(index = i + 1, total = photos.len(), file = %file, "processing");

        match import_one(pipeline, path, &name, &file, &mut store) {
            Ok(replaced) => {
                if replaced {
                    tracing::warn!(name = %name, file = %file, "duplicate name; later photo wins");
                }
                tracing::info!(name = %name, file = %file, "imported");
            }
            Err(reason) => {
                tracing::warn!(file = %file, reason = %reason, "skipping ID photo");
                failures.push(ImportFailure { file, reason });
            }
        }
    }

    tracing::info!(
        imported = store.len(),
        found = photos.len(),
        failed = failures.len(),
        "import finished"
    );

    Ok(ImportReport {
        store,
        found: photos.len(),
        failures,
    })
}

fn import_one(
    pipeline: &mut dyn CapturePipeline,
    path: &Path,
    name: &str,
    file: &str,
    store: &mut EmbeddingStore,
) -> Result<bool, String> {
    let bytes = fs::read(path).map_err(|e| format!("read failed: {e}"))?;
    let embedding = pipeline.embedding_for(&bytes).map_err(|e| e.to_string())?;
    let embedding = similarity::normalize(&embedding).map_err(|e| e.to_string())?;
    let previous = store
        .put(IdentityRecord::new(name, embedding, file))
        .map_err(|e| e.to_string())?;
    Ok(previous.is_some())
}
