//! Access to the source tree being built.
//!
//! The cache only needs two observations per file: its modification time and
//! its bytes. Keeping them behind [`SourceTree`] lets tests drive the mtime
//! fast path deterministically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::CacheError;

/// Read-only view of source files.
pub trait SourceTree {
    /// Returns the modification time in nanoseconds since the UNIX epoch,
    /// or `None` if the file does not exist.
    fn modified_time(&self, path: &Path) -> Result<Option<u64>, CacheError>;

    /// Reads the full contents of a file.
    fn read(&self, path: &Path) -> Result<Vec<u8>, CacheError>;
}

/// Source files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSources;

impl SourceTree for FsSources {
    fn modified_time(&self, path: &Path) -> Result<Option<u64>, CacheError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let modified = metadata.modified().map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        // Pre-epoch timestamps collapse to zero and simply never match.
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(Some(nanos))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, CacheError> {
        std::fs::read(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// In-memory source tree with explicit modification times.
#[derive(Debug, Default, Clone)]
pub struct MemorySources {
    files: HashMap<PathBuf, (u64, Vec<u8>)>,
}

impl MemorySources {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file with the given modification time.
    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        modified_time: u64,
        content: impl Into<Vec<u8>>,
    ) {
        self.files.insert(path.into(), (modified_time, content.into()));
    }

    /// Replaces a file's content while keeping its modification time.
    ///
    /// Models an edit that the filesystem did not timestamp.
    pub fn overwrite_in_place(&mut self, path: &Path, content: impl Into<Vec<u8>>) {
        if let Some(entry) = self.files.get_mut(path) {
            entry.1 = content.into();
        }
    }

    /// Updates a file's modification time without touching its content.
    pub fn touch(&mut self, path: &Path, modified_time: u64) {
        if let Some(entry) = self.files.get_mut(path) {
            entry.0 = modified_time;
        }
    }

    /// Removes a file.
    pub fn remove(&mut self, path: &Path) {
        self.files.remove(path);
    }
}

impl SourceTree for MemorySources {
    fn modified_time(&self, path: &Path) -> Result<Option<u64>, CacheError> {
        Ok(self.files.get(path).map(|(mtime, _)| *mtime))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, CacheError> {
        self.files
            .get(path)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| CacheError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such source file"),
            })
    }
}
