//! Configuration types deserialized from `minic.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The top-level project configuration parsed from `minic.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Core project metadata (name, entry module).
    pub project: ProjectMeta,
    /// Incremental cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Core project metadata required in every `minic.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// Path to the entry module (e.g. `main.mini`), relative to the project root.
    pub entry: String,
}

/// Settings for the multi-level build cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory, relative to the project root unless absolute.
    pub dir: PathBuf,
    /// Trust an unchanged modification time as proof that a file is unchanged.
    ///
    /// When disabled every file is re-hashed on every build.
    pub trust_mtime: bool,
    /// Reuse lowered code for functions whose sub-IR is unchanged.
    pub function_cache: bool,
    /// Patch the previous combined artifact instead of regenerating it.
    pub surgical_patch: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".minic-cache"),
            trust_mtime: true,
            function_cache: true,
            surgical_patch: true,
        }
    }
}

impl CacheConfig {
    /// Resolves the cache directory against the project root.
    pub fn resolve_dir(&self, project_dir: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            project_dir.join(&self.dir)
        }
    }
}
