//! Multi-level incremental build cache for the minic compiler.
//!
//! Decides at three granularities (whole file, single function, combined
//! output section) what must be recompiled and what can be reused from prior
//! builds, and persists the results in a content-addressed cache directory.

#![warn(missing_docs)]

pub mod combined;
pub mod error;
pub mod file_cache;
pub mod function_cache;
pub mod orchestrator;
pub mod patcher;
pub mod pipeline;
pub mod sources;
pub mod stats;
pub mod store;
pub mod tracker;

mod persist;

pub use combined::{CombinedArtifact, MarkerError, Section, SectionIndex};
pub use error::CacheError;
pub use file_cache::{FileArtifactCache, FileCacheEntry};
pub use function_cache::{lower_module, FunctionArtifactCache, FunctionStats};
pub use orchestrator::{BuildOptions, BuildOutput, FileArtifact, MultiLevelCache, Outcome};
pub use patcher::SurgicalPatcher;
pub use pipeline::{CodeGenerator, Frontend, FunctionIr, ModuleIr};
pub use sources::{FsSources, MemorySources, SourceTree};
pub use stats::CacheStats;
pub use store::{BlobBackend, BlobId, ContentStore, FsBackend, MemoryBackend};
pub use tracker::{ChangeTracker, CombinedHashes, FileRecord, Freshness, Observation};
