//! High-level build orchestrator.
//!
//! `MultiLevelCache` ties the change tracker, the file and function caches
//! and the surgical patcher into one decision protocol. For every file, the
//! first satisfied state wins:
//!
//! 1. **FastHit**: mtime unchanged and the combined hash has a live entry.
//!    Nothing is read or hashed.
//! 2. **FileHit**: the file was re-hashed, but the combined hash still has
//!    a live entry.
//! 3. **PatchHit**: the file is recompiled and its section is spliced into
//!    the previous combined artifact.
//! 4. **FullCompile**: the file is recompiled and the combined artifact is
//!    regenerated from every section.
//!
//! Recompiled files still consult the function cache for each function.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use minic_common::ContentHash;
use minic_config::{CacheConfig, ProjectConfig};
use tracing::{debug, info, warn};

use crate::combined::CombinedArtifact;
use crate::error::CacheError;
use crate::file_cache::FileArtifactCache;
use crate::function_cache::{lower_module, FunctionArtifactCache};
use crate::patcher::SurgicalPatcher;
use crate::pipeline::{CodeGenerator, Frontend};
use crate::sources::SourceTree;
use crate::stats::CacheStats;
use crate::tracker::{ChangeTracker, CombinedHashes, Observation};

/// Name of the change-tracker index within the cache directory.
const FILE_HASHES: &str = "file_hashes.bin";

/// Name used for the combined artifact when no root is given.
const DEFAULT_ARTIFACT_NAME: &str = "combined";

/// Knobs for a [`MultiLevelCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Compiler version; caches written by another version are ignored.
    pub compiler_version: String,
    /// Trust an unchanged mtime as proof that a file is unchanged.
    pub trust_mtime: bool,
    /// Reuse lowered code per function.
    pub function_cache: bool,
    /// Patch the previous combined artifact when possible.
    pub surgical_patch: bool,
    /// Logical name of the combined artifact. Defaults to the first root.
    pub artifact_name: Option<String>,
}

impl BuildOptions {
    /// Options with every cache level enabled.
    pub fn new(compiler_version: &str) -> Self {
        Self::from_config(&CacheConfig::default(), compiler_version)
    }

    /// Options taken from the `[cache]` table of `minic.toml`.
    pub fn from_config(cache: &CacheConfig, compiler_version: &str) -> Self {
        Self {
            compiler_version: compiler_version.to_string(),
            trust_mtime: cache.trust_mtime,
            function_cache: cache.function_cache,
            surgical_patch: cache.surgical_patch,
            artifact_name: None,
        }
    }
}

/// How a file's artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reused on the mtime fast path.
    FastHit,
    /// Reused after re-hashing.
    FileHit,
    /// Recompiled and patched into the previous combined artifact.
    PatchHit,
    /// Recompiled with a full combined-artifact regeneration.
    FullCompile,
}

impl Outcome {
    /// Returns `true` if the file was recompiled.
    pub fn is_compiled(self) -> bool {
        matches!(self, Self::PatchHit | Self::FullCompile)
    }
}

/// The artifact of a single file.
#[derive(Debug, Clone)]
pub struct FileArtifact {
    /// The source file.
    pub path: PathBuf,
    /// Combined hash the artifact corresponds to.
    pub combined_hash: ContentHash,
    /// How it was obtained.
    pub outcome: Outcome,
    /// The artifact bytes.
    pub bytes: Vec<u8>,
}

/// Everything a build produces.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Per-file artifacts in build order: imports before their importers.
    pub artifacts: Vec<FileArtifact>,
    /// The combined artifact with per-file section markers.
    pub combined: Vec<u8>,
}

impl BuildOutput {
    /// Looks up one file's artifact.
    pub fn artifact(&self, path: &Path) -> Option<&FileArtifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// Looks up how one file was handled.
    pub fn outcome(&self, path: &Path) -> Option<Outcome> {
        self.artifact(path).map(|a| a.outcome)
    }

    /// Paths in build order.
    pub fn layout(&self) -> Vec<PathBuf> {
        self.artifacts.iter().map(|a| a.path.clone()).collect()
    }
}

/// State gathered while walking the import closure.
#[derive(Default)]
struct Walk {
    visited: HashSet<PathBuf>,
    order: Vec<PathBuf>,
    observations: HashMap<PathBuf, Observation>,
}

/// A file whose imports are still being walked.
struct WalkFrame {
    path: PathBuf,
    imports: Vec<PathBuf>,
    next: usize,
}

/// What to do with one file in a build pass.
enum Plan {
    Reuse(Outcome, Vec<u8>),
    Compile(Vec<u8>),
}

/// A pass either finishes or finds a file edited behind the mtime fast path.
enum Pass {
    Done(BuildOutput),
    StaleMtime(PathBuf),
}

/// Multi-level incremental build cache.
pub struct MultiLevelCache {
    cache_dir: PathBuf,
    options: BuildOptions,
    tracker: ChangeTracker,
    files: FileArtifactCache,
    functions: FunctionArtifactCache,
    stats: CacheStats,
}

impl MultiLevelCache {
    /// Opens (or cold-starts) the cache stored in `cache_dir`.
    ///
    /// Missing or unusable indices are treated as empty.
    pub fn open(cache_dir: &Path, options: BuildOptions) -> Self {
        let version = options.compiler_version.as_str();
        Self {
            cache_dir: cache_dir.to_path_buf(),
            tracker: ChangeTracker::load(&cache_dir.join(FILE_HASHES), version),
            files: FileArtifactCache::load(cache_dir, version),
            functions: FunctionArtifactCache::load(cache_dir, version),
            stats: CacheStats::default(),
            options,
        }
    }

    /// Opens the cache configured by a project's `minic.toml`.
    ///
    /// The combined artifact is named after the project's entry module.
    pub fn from_config(
        project_dir: &Path,
        config: &ProjectConfig,
        compiler_version: &str,
    ) -> Self {
        let mut options = BuildOptions::from_config(&config.cache, compiler_version);
        options.artifact_name = Some(config.project.entry.clone());
        Self::open(&config.cache.resolve_dir(project_dir), options)
    }

    /// Builds the import closure of `roots` and persists the caches.
    ///
    /// On error the in-memory indices are reloaded from disk, so a failed
    /// build never leaves entries behind that the stored combined artifact
    /// does not reflect.
    pub fn build(
        &mut self,
        roots: &[PathBuf],
        sources: &dyn SourceTree,
        frontend: &dyn Frontend,
        codegen: &dyn CodeGenerator,
    ) -> Result<BuildOutput, CacheError> {
        let result = self.run(roots, sources, frontend, codegen);
        if result.is_err() {
            self.reload();
        }
        result
    }

    fn run(
        &mut self,
        roots: &[PathBuf],
        sources: &dyn SourceTree,
        frontend: &dyn Frontend,
        codegen: &dyn CodeGenerator,
    ) -> Result<BuildOutput, CacheError> {
        let start = Instant::now();

        let mut trust_mtime = self.options.trust_mtime;
        let output = loop {
            match self.build_pass(roots, sources, frontend, codegen, trust_mtime)? {
                Pass::Done(output) => break output,
                Pass::StaleMtime(path) => {
                    warn!(
                        path = %path.display(),
                        "file changed without a new modification time, re-hashing every file"
                    );
                    trust_mtime = false;
                }
            }
        };

        self.stats.elapsed = start.elapsed();
        self.save()?;
        info!(files = output.artifacts.len(), "build finished: {}", self.stats);
        Ok(output)
    }

    fn build_pass(
        &mut self,
        roots: &[PathBuf],
        sources: &dyn SourceTree,
        frontend: &dyn Frontend,
        codegen: &dyn CodeGenerator,
        trust_mtime: bool,
    ) -> Result<Pass, CacheError> {
        self.stats = CacheStats::default();

        let mut walk = self.walk_imports(roots, sources, frontend, trust_mtime)?;

        let mut memo = CombinedHashes::new();
        let mut hashes = Vec::with_capacity(walk.order.len());
        for path in &walk.order {
            hashes.push(self.tracker.combined_hash(path, &mut memo)?);
        }

        // Decide everything before compiling anything, so a restart after a
        // stale mtime leaves no half-applied work behind.
        let mut plans = Vec::with_capacity(walk.order.len());
        for (path, combined_hash) in walk.order.iter().zip(&hashes) {
            let observation = walk.observations.remove(path);
            let fast_path = observation.as_ref().is_some_and(|o| o.source.is_none());

            if let Some(bytes) = self.files.get_artifact(path, combined_hash)? {
                let outcome = if fast_path {
                    Outcome::FastHit
                } else {
                    Outcome::FileHit
                };
                plans.push(Plan::Reuse(outcome, bytes));
                continue;
            }

            let source = match observation.and_then(|o| o.source) {
                Some(source) => source,
                None => {
                    let source = sources.read(path)?;
                    let recorded = self.tracker.record_for(path).map(|r| r.content_hash);
                    if recorded != Some(ContentHash::from_bytes(&source)) {
                        return Ok(Pass::StaleMtime(path.clone()));
                    }
                    source
                }
            };
            plans.push(Plan::Compile(source));
        }

        let mut artifacts = Vec::with_capacity(plans.len());
        let mut compiled = HashSet::new();
        for ((path, combined_hash), plan) in walk.order.iter().zip(hashes).zip(plans) {
            let (outcome, bytes) = match plan {
                Plan::Reuse(outcome, bytes) => {
                    match outcome {
                        Outcome::FastHit => self.stats.fast_hits += 1,
                        _ => self.stats.file_hits += 1,
                    }
                    debug!(path = %path.display(), ?outcome, "reusing file artifact");
                    (outcome, bytes)
                }
                Plan::Compile(source) => {
                    let bytes = self.compile_file(path, &source, frontend, codegen)?;
                    self.files.put(path, combined_hash, &bytes)?;
                    compiled.insert(path.clone());
                    // Settled once the combined artifact is assembled.
                    (Outcome::FullCompile, bytes)
                }
            };
            artifacts.push(FileArtifact {
                path: path.clone(),
                combined_hash,
                outcome,
                bytes,
            });
        }

        let combined = self.assemble(roots, &mut artifacts, &compiled)?;
        Ok(Pass::Done(BuildOutput {
            artifacts,
            combined,
        }))
    }

    /// Refreshes the import closure of `roots` depth-first.
    ///
    /// Files land in `walk.order` in post-order, imports before importers.
    /// The walk keeps an explicit stack, so long import chains cannot
    /// exhaust the thread's stack.
    fn walk_imports(
        &mut self,
        roots: &[PathBuf],
        sources: &dyn SourceTree,
        frontend: &dyn Frontend,
        trust_mtime: bool,
    ) -> Result<Walk, CacheError> {
        let mut walk = Walk::default();
        for root in roots {
            if walk.visited.contains(root) {
                continue;
            }
            let frame = self.enter(root, None, sources, frontend, trust_mtime, &mut walk)?;
            let mut stack = vec![frame];
            while let Some(frame) = stack.last_mut() {
                let Some(import) = frame.imports.get(frame.next).cloned() else {
                    if let Some(done) = stack.pop() {
                        walk.order.push(done.path);
                    }
                    continue;
                };
                frame.next += 1;
                if walk.visited.contains(&import) {
                    continue;
                }
                let importer = frame.path.clone();
                let child = self.enter(
                    &import,
                    Some(&importer),
                    sources,
                    frontend,
                    trust_mtime,
                    &mut walk,
                )?;
                stack.push(child);
            }
        }
        Ok(walk)
    }

    /// Refreshes one file and opens its frame in the walk.
    fn enter(
        &mut self,
        path: &Path,
        importer: Option<&Path>,
        sources: &dyn SourceTree,
        frontend: &dyn Frontend,
        trust_mtime: bool,
        walk: &mut Walk,
    ) -> Result<WalkFrame, CacheError> {
        walk.visited.insert(path.to_path_buf());

        let Some(observation) = self.tracker.refresh(path, sources, frontend, trust_mtime)? else {
            return Err(match importer {
                Some(importer) => CacheError::MissingImport {
                    importer: importer.to_path_buf(),
                    import: path.to_path_buf(),
                },
                None => CacheError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "build root does not exist",
                    ),
                },
            });
        };
        if observation.source.is_some() {
            self.stats.files_hashed += 1;
        }
        walk.observations.insert(path.to_path_buf(), observation);

        let imports = self
            .tracker
            .record_for(path)
            .map(|record| record.direct_imports.clone())
            .unwrap_or_default();
        Ok(WalkFrame {
            path: path.to_path_buf(),
            imports,
            next: 0,
        })
    }

    fn compile_file(
        &mut self,
        path: &Path,
        source: &[u8],
        frontend: &dyn Frontend,
        codegen: &dyn CodeGenerator,
    ) -> Result<Vec<u8>, CacheError> {
        let module = frontend
            .compile(path, source)
            .map_err(|e| CacheError::Frontend {
                path: path.to_path_buf(),
                source: e,
            })?;
        let functions = if self.options.function_cache {
            Some(&mut self.functions)
        } else {
            None
        };
        let (bytes, function_stats) = lower_module(path, &module, codegen, functions)?;
        self.stats.add_functions(function_stats);
        Ok(bytes)
    }

    /// Produces the combined artifact, patching when possible.
    fn assemble(
        &mut self,
        roots: &[PathBuf],
        artifacts: &mut [FileArtifact],
        compiled: &HashSet<PathBuf>,
    ) -> Result<Vec<u8>, CacheError> {
        let name = self.artifact_name(roots);
        let previous = self.files.get_combined_artifact(&name)?;

        let current: Vec<_> = artifacts
            .iter()
            .map(|a| (a.path.as_path(), a.combined_hash, a.bytes.as_slice()))
            .collect();
        let patched = if self.options.surgical_patch {
            SurgicalPatcher::try_patch(previous.as_deref(), &current)
        } else {
            None
        };

        let (combined, outcome) = match patched {
            Some(patched) => (patched, Outcome::PatchHit),
            None => {
                debug!(artifact = %name, "regenerating combined artifact");
                (CombinedArtifact::render(current), Outcome::FullCompile)
            }
        };

        for artifact in artifacts.iter_mut().filter(|a| compiled.contains(&a.path)) {
            artifact.outcome = outcome;
            match outcome {
                Outcome::PatchHit => self.stats.patch_hits += 1,
                _ => self.stats.full_compiles += 1,
            }
        }

        if previous.as_deref() != Some(combined.as_slice()) {
            self.files.put_combined_artifact(&name, &combined)?;
        }
        Ok(combined)
    }

    fn artifact_name(&self, roots: &[PathBuf]) -> String {
        match (&self.options.artifact_name, roots.first()) {
            (Some(name), _) => name.clone(),
            (None, Some(root)) => root.to_string_lossy().into_owned(),
            (None, None) => DEFAULT_ARTIFACT_NAME.to_string(),
        }
    }

    /// Counters from the most recent build.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// The change tracker.
    pub fn change_tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// The file-level artifact cache.
    pub fn file_cache(&self) -> &FileArtifactCache {
        &self.files
    }

    /// The function-level artifact cache.
    pub fn function_cache(&self) -> &FunctionArtifactCache {
        &self.functions
    }

    /// The options the cache was opened with.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Drops file-cache entries for every path outside `live`.
    ///
    /// Returns the number of entries removed. Blobs stay in the store until
    /// the cache is cleaned.
    pub fn evict_except(&mut self, live: &[PathBuf]) -> usize {
        let live: HashSet<PathBuf> = live.iter().cloned().collect();
        self.files.evict_except(&live)
    }

    /// Persists every index to the cache directory.
    pub fn save(&self) -> Result<(), CacheError> {
        let version = &self.options.compiler_version;
        self.tracker.save(&self.cache_dir.join(FILE_HASHES), version)?;
        self.files.save()?;
        self.functions.save()
    }

    /// Deletes the cache directory and resets every in-memory index.
    ///
    /// This is the only way back to a guaranteed cold cache.
    pub fn clean(&mut self) -> Result<(), CacheError> {
        Self::clean_dir(&self.cache_dir)?;
        self.reload();
        self.stats = CacheStats::default();
        Ok(())
    }

    /// Replaces the in-memory indices with what is on disk.
    fn reload(&mut self) {
        let version = self.options.compiler_version.as_str();
        self.tracker = ChangeTracker::load(&self.cache_dir.join(FILE_HASHES), version);
        self.files = FileArtifactCache::load(&self.cache_dir, version);
        self.functions = FunctionArtifactCache::load(&self.cache_dir, version);
    }

    /// Deletes a cache directory unconditionally. A missing directory is fine.
    pub fn clean_dir(cache_dir: &Path) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(cache_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: cache_dir.to_path_buf(),
                source: e,
            }),
        }
    }
}
