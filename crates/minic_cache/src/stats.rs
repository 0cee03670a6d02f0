//! Hit and miss counters for the last build.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::function_cache::FunctionStats;

/// Snapshot of what the cache did during a build. Purely observational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Files reused without reading them (mtime short-circuit).
    pub fast_hits: usize,
    /// Files reused after re-hashing showed no semantic change.
    pub file_hits: usize,
    /// Changed files whose section was patched into the previous combined artifact.
    pub patch_hits: usize,
    /// Changed files that went through a full combined-artifact regeneration.
    pub full_compiles: usize,
    /// Functions whose lowered code came from the function cache.
    pub function_hits: usize,
    /// Functions that had to be lowered.
    pub function_misses: usize,
    /// Files whose content was read and hashed.
    pub files_hashed: usize,
    /// Wall-clock time of the build.
    pub elapsed: Duration,
}

impl CacheStats {
    /// Files that were reused without compiling.
    pub fn file_level_hits(&self) -> usize {
        self.fast_hits + self.file_hits
    }

    /// Files that were compiled.
    pub fn compiled(&self) -> usize {
        self.patch_hits + self.full_compiles
    }

    pub(crate) fn add_functions(&mut self, stats: FunctionStats) {
        self.function_hits += stats.hits;
        self.function_misses += stats.misses;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fast, {} file, {} patched, {} full; functions {} hit / {} miss; {} hashed in {:.2?}",
            self.fast_hits,
            self.file_hits,
            self.patch_hits,
            self.full_compiles,
            self.function_hits,
            self.function_misses,
            self.files_hashed,
            self.elapsed,
        )
    }
}
