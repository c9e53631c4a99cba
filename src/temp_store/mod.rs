//! TempFileStore - Scoped Temporary Files
//!
//! ## Responsibilities
//!
//! - Create uniquely named files under a controlled directory
//! - Guarantee deletion on every exit path via an RAII handle
//! - Sweep everything still tracked at process shutdown

use crate::error::Result;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Registry of temporary files still owned by the process
pub struct TempFileStore {
    dir: PathBuf,
    tracked: Mutex<HashSet<PathBuf>>,
}

impl TempFileStore {
    /// Create the store, ensuring its directory exists
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tracked: Mutex::new(HashSet::new()),
        })
    }

    /// Create and register a new uniquely named temporary file. The returned
    /// handle deletes the file when dropped unless it was persisted.
    pub fn acquire(self: &Arc<Self>, suffix: &str) -> Result<TempFile> {
        let path = self.dir.join(format!("tmp-{}{}", Uuid::new_v4(), suffix));
        fs::File::create(&path)?;
        self.registry().insert(path.clone());
        tracing::debug!(path = %path.display(), "Temporary file acquired");
        Ok(TempFile {
            path,
            store: Arc::clone(self),
            released: false,
        })
    }

    /// Delete a tracked file. Idempotent; a file already removed from disk is
    /// not an error.
    fn release(&self, path: &Path) {
        if !self.registry().remove(path) {
            return;
        }
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }

    /// Stop tracking a file without deleting it (used after persist)
    fn forget(&self, path: &Path) {
        self.registry().remove(path);
    }

    /// Delete every currently tracked file; invoked once at shutdown
    pub fn release_all(&self) {
        let paths: Vec<PathBuf> = self.registry().drain().collect();
        if paths.is_empty() {
            return;
        }
        tracing::info!(count = paths.len(), "Releasing tracked temporary files");
        for path in paths {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
    }

    /// Number of files currently tracked
    pub fn tracked_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // Poisoning is a programming defect in a registry mutation; recover
        // with the inner state rather than propagating a panic.
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped handle to one temporary file
pub struct TempFile {
    path: PathBuf,
    store: Arc<TempFileStore>,
    released: bool,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to a final location and stop tracking it. If the rename
    /// fails the handle is dropped and the temporary file is still cleaned up.
    pub fn persist(mut self, dest: &Path) -> Result<PathBuf> {
        fs::rename(&self.path, dest)?;
        self.store.forget(&self.path);
        self.released = true;
        Ok(dest.to_path_buf())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.released {
            self.store.release(&self.path);
        }
    }
}
