//! Content-addressed blob storage.
//!
//! Blobs are keyed by the SHA-256 digest of their bytes and laid out in a
//! two-level tree sharded by the first byte of the digest:
//! `<root>/ab/cdef…`. Writing the same bytes twice is a no-op, and every
//! read is verified against its key.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// SHA-256 digest identifying a stored blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId([u8; 32]);

impl BlobId {
    /// Computes the id of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Relative storage key: two hex characters of shard, a slash, the rest.
    pub fn shard_key(&self) -> String {
        let hex = self.to_string();
        format!("{}/{}", &hex[..2], &hex[2..])
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Raw storage underneath a [`ContentStore`].
///
/// Keys are relative shard paths produced by [`BlobId::shard_key`].
pub trait BlobBackend {
    /// Reads a blob, returning `None` if it is absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Writes a blob, replacing any existing bytes under the key.
    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    /// Returns `true` if a blob exists under the key.
    fn contains(&self, key: &str) -> bool;

    /// Removes every blob.
    fn clear(&mut self) -> Result<(), CacheError>;
}

/// Filesystem backend: one file per blob under a sharded directory tree.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Creates a backend rooted at `root`. Nothing is created until the first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobBackend for FsBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if let Some(shard) = path.parent() {
            std::fs::create_dir_all(shard).map_err(|e| CacheError::Io {
                path: shard.to_path_buf(),
                source: e,
            })?;
        }

        // Readers never observe a half-written blob.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }

    fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: self.root.clone(),
                source: e,
            }),
        }
    }
}

/// In-memory backend keyed by the same shard paths as [`FsBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        self.blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.blobs.clear();
        Ok(())
    }
}

/// Content-addressed key/value blob store.
///
/// Callers only ever hold [`BlobId`]s; the backend is owned by the store.
pub struct ContentStore {
    backend: Box<dyn BlobBackend>,
}

impl ContentStore {
    /// Creates a store over an arbitrary backend.
    pub fn new(backend: Box<dyn BlobBackend>) -> Self {
        Self { backend }
    }

    /// Creates a filesystem-backed store rooted at `root`.
    pub fn on_disk(root: &Path) -> Self {
        Self::new(Box::new(FsBackend::new(root)))
    }

    /// Creates an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Stores `data` and returns its id. Storing bytes already present writes nothing.
    pub fn put(&mut self, data: &[u8]) -> Result<BlobId, CacheError> {
        let id = BlobId::of(data);
        let key = id.shard_key();
        if !self.backend.contains(&key) {
            self.backend.write(&key, data)?;
        }
        Ok(id)
    }

    /// Reads a blob back, verifying it against its id.
    ///
    /// Returns `Ok(None)` when the blob is absent and
    /// [`CacheError::Integrity`] when its bytes no longer match the id.
    pub fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(data) = self.backend.read(&id.shard_key())? else {
            return Ok(None);
        };
        let actual = BlobId::of(&data);
        if actual != *id {
            return Err(CacheError::Integrity { blob: *id, actual });
        }
        Ok(Some(data))
    }

    /// Returns `true` if a blob with this id is stored.
    pub fn contains(&self, id: &BlobId) -> bool {
        self.backend.contains(&id.shard_key())
    }

    /// Removes every blob in the store.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.backend.clear()
    }
}
