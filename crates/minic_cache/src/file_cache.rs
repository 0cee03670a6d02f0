//! File-level artifact cache.
//!
//! Maps a source path and its combined hash to the artifact produced for
//! that file. Only an exact combined-hash match is a hit. The most recent
//! combined artifact of each build target is kept alongside so it can be
//! patched instead of regenerated.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use minic_common::ContentHash;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CacheError;
use crate::persist;
use crate::store::{BlobId, ContentStore};

/// Subdirectory holding file-level blobs.
const IR_SUBDIR: &str = "ir";

/// Subdirectory holding combined artifacts.
const COMBINED_SUBDIR: &str = "combined";

/// Name of the index file within the cache directory.
const INDEX_FILE: &str = "file_cache.bin";

/// The live cache entry for one source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCacheEntry {
    /// Combined hash the artifact was built from.
    pub combined_hash: ContentHash,
    /// Where the artifact lives in the content store.
    pub blob: BlobId,
}

/// Cache of per-file artifacts keyed by combined hash.
pub struct FileArtifactCache {
    cache_dir: PathBuf,
    entries: HashMap<PathBuf, FileCacheEntry>,
    store: ContentStore,
    compiler_version: String,
}

impl FileArtifactCache {
    /// Opens the cache under `cache_dir`, restoring its index if present.
    pub fn load(cache_dir: &Path, compiler_version: &str) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            entries: persist::load_index(&cache_dir.join(INDEX_FILE), compiler_version),
            store: ContentStore::on_disk(&cache_dir.join(IR_SUBDIR)),
            compiler_version: compiler_version.to_string(),
        }
    }

    /// Returns `true` only if the live entry for `path` has exactly this hash.
    pub fn has_matching_hash(&self, path: &Path, combined_hash: &ContentHash) -> bool {
        self.entries
            .get(path)
            .is_some_and(|entry| entry.combined_hash == *combined_hash)
    }

    /// Returns the live entry for a path.
    pub fn entry(&self, path: &Path) -> Option<&FileCacheEntry> {
        self.entries.get(path)
    }

    /// Returns the cached artifact if the combined hash matches.
    ///
    /// A stale entry is a miss even though its data still exists. A blob that
    /// vanished from the store is also a miss.
    pub fn get_artifact(
        &self,
        path: &Path,
        combined_hash: &ContentHash,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(entry) = self
            .entries
            .get(path)
            .filter(|entry| entry.combined_hash == *combined_hash)
        else {
            return Ok(None);
        };

        let artifact = self.store.get(&entry.blob)?;
        if artifact.is_none() {
            warn!(path = %path.display(), blob = %entry.blob, "cached artifact missing from store");
        }
        Ok(artifact)
    }

    /// Stores an artifact and makes it the live entry for `path`.
    pub fn put(
        &mut self,
        path: &Path,
        combined_hash: ContentHash,
        artifact: &[u8],
    ) -> Result<(), CacheError> {
        let blob = self.store.put(artifact)?;
        self.entries.insert(
            path.to_path_buf(),
            FileCacheEntry {
                combined_hash,
                blob,
            },
        );
        Ok(())
    }

    /// Reads the most recent combined artifact stored under `name`.
    pub fn get_combined_artifact(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.combined_path(name);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    /// Replaces the combined artifact stored under `name`.
    pub fn put_combined_artifact(&self, name: &str, artifact: &[u8]) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(COMBINED_SUBDIR);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let path = self.combined_path(name);
        std::fs::write(&path, artifact).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Drops entries of paths outside `retain`. Blobs are left in the store.
    pub fn evict_except(&mut self, retain: &HashSet<PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| retain.contains(path));
        before - self.entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persists the index.
    pub fn save(&self) -> Result<(), CacheError> {
        persist::save_index(
            &self.cache_dir.join(INDEX_FILE),
            &self.compiler_version,
            &self.entries,
        )
    }

    fn combined_path(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(COMBINED_SUBDIR)
            .join(combined_file_name(name))
    }
}

/// Flattens a logical build name such as `src/main.mini` into one file name.
///
/// The flattened form is for humans; the suffix is a hash of the full name,
/// so `src/main.mini` and `src_main.mini` do not share an artifact.
fn combined_file_name(name: &str) -> String {
    let flat: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = ContentHash::from_bytes(name.as_bytes()).to_string();
    format!("{flat}-{}", &digest[..12])
}
