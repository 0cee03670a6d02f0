//! Error types for cache operations.

use std::path::PathBuf;

use minic_common::StageError;

use crate::store::BlobId;

/// Errors that stop a build.
///
/// Cache misses are never errors: a missing, stale or unreadable index
/// degrades to recompilation. What remains here either means the cached
/// data cannot be trusted or the input itself is unusable.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache or source files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A stored blob does not hash to its own id.
    #[error("integrity check failed for blob {blob}: content hashes to {actual}")]
    Integrity {
        /// The id the blob was stored under.
        blob: BlobId,
        /// The id its current bytes hash to.
        actual: BlobId,
    },

    /// The import graph contains a cycle, so no combined hash exists.
    #[error("cyclic import: {}", display_cycle(.cycle))]
    CyclicImport {
        /// The files on the cycle, starting and ending with the same path.
        cycle: Vec<PathBuf>,
    },

    /// A file imports a path that is not part of the source tree.
    #[error("{importer} imports {import}, which does not exist")]
    MissingImport {
        /// The file containing the import.
        importer: PathBuf,
        /// The imported path that could not be found.
        import: PathBuf,
    },

    /// A combined hash was requested for a file that was never refreshed.
    #[error("no change record for {path}")]
    Untracked {
        /// The file without a record.
        path: PathBuf,
    },

    /// The front end rejected a source file.
    #[error("failed to compile {path}: {source}")]
    Frontend {
        /// The file that failed.
        path: PathBuf,
        /// The front-end failure.
        source: StageError,
    },

    /// The code generator failed to lower a function.
    #[error("failed to lower `{function}` in {path}: {source}")]
    Codegen {
        /// The file containing the function.
        path: PathBuf,
        /// The function name.
        function: String,
        /// The code-generator failure.
        source: StageError,
    },
}

fn display_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
