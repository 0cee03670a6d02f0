//! Versioned binary index files.
//!
//! Every index is written as a bincode envelope carrying the format version
//! and the compiler version that produced it. Anything unexpected on load
//! (missing, empty, corrupt, incompatible) yields an empty index so the
//! build falls back to recompiling.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;

/// Current index format version. Increment on breaking changes to any index.
const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexEnvelope<T> {
    format_version: u32,
    compiler_version: String,
    entries: T,
}

/// Loads an index, returning `T::default()` on a cold or unusable file.
pub(crate) fn load_index<T>(path: &Path, compiler_version: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no index on disk, starting cold");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable cache index, starting cold");
            return T::default();
        }
    };

    if raw.is_empty() {
        return T::default();
    }

    let envelope: IndexEnvelope<T> =
        match bincode::serde::decode_from_slice(&raw, bincode::config::standard()) {
            Ok((envelope, _)) => envelope,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache index, starting cold");
                return T::default();
            }
        };

    if envelope.format_version != INDEX_FORMAT_VERSION {
        warn!(
            path = %path.display(),
            expected = INDEX_FORMAT_VERSION,
            found = envelope.format_version,
            "cache index format changed, starting cold"
        );
        return T::default();
    }
    if envelope.compiler_version != compiler_version {
        debug!(
            path = %path.display(),
            found = %envelope.compiler_version,
            "cache written by another compiler version, starting cold"
        );
        return T::default();
    }

    envelope.entries
}

/// Writes an index in a single pass, creating the parent directory if needed.
pub(crate) fn save_index<T>(
    path: &Path,
    compiler_version: &str,
    entries: &T,
) -> Result<(), CacheError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let envelope = IndexEnvelope {
        format_version: INDEX_FORMAT_VERSION,
        compiler_version: compiler_version.to_string(),
        entries,
    };
    let bytes = bincode::serde::encode_to_vec(&envelope, bincode::config::standard()).map_err(
        |e| CacheError::Serialization {
            reason: e.to_string(),
        },
    )?;

    std::fs::write(path, bytes).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
