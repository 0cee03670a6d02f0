//! Per-file change tracking and dependency-folded hashing.
//!
//! The tracker answers two separate questions. "Did this file change?" is
//! answered cheaply from its modification time, falling back to a content
//! hash whenever the time differs. "Did this file's meaning change?" is the
//! combined hash, which folds in the combined hashes of every import.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use minic_common::{ContentHash, ContentHasher};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::persist;
use crate::pipeline::Frontend;
use crate::sources::SourceTree;

/// Last observed state of a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path of the file, as used for lookups in the source tree.
    pub path: PathBuf,
    /// Modification time in nanoseconds since the UNIX epoch.
    pub modified_time: u64,
    /// Hash of the file's bytes.
    pub content_hash: ContentHash,
    /// Imports in declaration order.
    pub direct_imports: Vec<PathBuf>,
}

/// How a file compares to its stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Modification time matched the record. The file is only read when
    /// the mtime is not trusted, and then its content matched too.
    Unchanged,
    /// Modification time differed but the content hash did not.
    Touched,
    /// Content hash differed from the stored record.
    Modified,
    /// No record existed.
    New,
}

/// Result of refreshing one file.
#[derive(Debug)]
pub struct Observation {
    /// Comparison against the stored record.
    pub freshness: Freshness,
    /// The file's bytes, if they had to be read.
    pub source: Option<Vec<u8>>,
}

/// Memo table of combined hashes for a single build.
///
/// Shared imports are hashed once, which keeps diamond-shaped graphs linear
/// in files plus edges.
#[derive(Debug, Default)]
pub struct CombinedHashes {
    resolved: HashMap<PathBuf, ContentHash>,
}

impl CombinedHashes {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an already resolved hash.
    pub fn get(&self, path: &Path) -> Option<ContentHash> {
        self.resolved.get(path).copied()
    }

    /// Number of resolved files.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Returns `true` if nothing has been resolved.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Persistent map of [`FileRecord`]s.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    records: HashMap<PathBuf, FileRecord>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores records from an index file.
    ///
    /// A missing, empty or unusable index gives an empty tracker.
    pub fn load(index_path: &Path, compiler_version: &str) -> Self {
        Self {
            records: persist::load_index(index_path, compiler_version),
        }
    }

    /// Persists every record in one write.
    pub fn save(&self, index_path: &Path, compiler_version: &str) -> Result<(), CacheError> {
        persist::save_index(index_path, compiler_version, &self.records)
    }

    /// Returns the stored record for a file.
    pub fn record_for(&self, path: &Path) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no files are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Observes a file and brings its record up to date.
    ///
    /// With `trust_mtime`, an identical modification time short-circuits to
    /// [`Freshness::Unchanged`] without reading the file. Any other case
    /// hashes the content, so an mtime is never the only evidence of a
    /// change. Returns `Ok(None)` if the file does not exist.
    pub fn refresh(
        &mut self,
        path: &Path,
        sources: &dyn SourceTree,
        frontend: &dyn Frontend,
        trust_mtime: bool,
    ) -> Result<Option<Observation>, CacheError> {
        let Some(modified_time) = sources.modified_time(path)? else {
            return Ok(None);
        };

        if trust_mtime {
            if let Some(record) = self.records.get(path) {
                if record.modified_time == modified_time {
                    return Ok(Some(Observation {
                        freshness: Freshness::Unchanged,
                        source: None,
                    }));
                }
            }
        }

        let source = sources.read(path)?;
        let content_hash = ContentHash::from_bytes(&source);

        let previous = self.records.get(path).map(|r| (r.content_hash, r.modified_time));
        let freshness = match previous {
            Some((stored_hash, stored_time)) if stored_hash == content_hash => {
                if let Some(record) = self.records.get_mut(path) {
                    record.modified_time = modified_time;
                }
                if stored_time == modified_time {
                    Freshness::Unchanged
                } else {
                    Freshness::Touched
                }
            }
            previous => {
                let direct_imports = frontend
                    .scan_imports(path, &source)
                    .map_err(|e| CacheError::Frontend {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                self.records.insert(
                    path.to_path_buf(),
                    FileRecord {
                        path: path.to_path_buf(),
                        modified_time,
                        content_hash,
                        direct_imports,
                    },
                );
                if previous.is_some() {
                    Freshness::Modified
                } else {
                    Freshness::New
                }
            }
        };

        Ok(Some(Observation {
            freshness,
            source: Some(source),
        }))
    }

    /// Computes the combined hash of a file from the stored records.
    ///
    /// Every import must already be refreshed. An import without a record is
    /// [`CacheError::MissingImport`]; an import cycle is
    /// [`CacheError::CyclicImport`]. The walk keeps its own stack, so import
    /// depth is bounded by memory rather than by the thread's stack.
    pub fn combined_hash(
        &self,
        path: &Path,
        memo: &mut CombinedHashes,
    ) -> Result<ContentHash, CacheError> {
        if let Some(hash) = memo.resolved.get(path) {
            return Ok(*hash);
        }
        let root = self.records.get(path).ok_or_else(|| CacheError::Untracked {
            path: path.to_path_buf(),
        })?;

        let mut on_stack: HashSet<&Path> = HashSet::from([root.path.as_path()]);
        let mut stack = vec![HashFrame::new(root)];
        while let Some(frame) = stack.last_mut() {
            let record = frame.record;
            if let Some(import) = record.direct_imports.get(frame.next) {
                frame.next += 1;
                if let Some(hash) = memo.resolved.get(import) {
                    frame.hasher.hash(hash);
                    continue;
                }
                if on_stack.contains(import.as_path()) {
                    let start = stack
                        .iter()
                        .position(|f| f.record.path == *import)
                        .unwrap_or(0);
                    let mut cycle: Vec<PathBuf> =
                        stack[start..].iter().map(|f| f.record.path.clone()).collect();
                    cycle.push(import.clone());
                    return Err(CacheError::CyclicImport { cycle });
                }
                let imported = self.records.get(import).ok_or_else(|| {
                    CacheError::MissingImport {
                        importer: record.path.clone(),
                        import: import.clone(),
                    }
                })?;
                on_stack.insert(imported.path.as_path());
                stack.push(HashFrame::new(imported));
                continue;
            }

            let hash = frame.hasher.finish();
            on_stack.remove(record.path.as_path());
            memo.resolved.insert(record.path.clone(), hash);
            stack.pop();
            match stack.last_mut() {
                Some(parent) => {
                    parent.hasher.hash(&hash);
                }
                None => return Ok(hash),
            }
        }
        // The loop only exits through the root's own frame.
        Err(CacheError::Untracked {
            path: path.to_path_buf(),
        })
    }
}

/// One file whose combined hash is being folded.
struct HashFrame<'a> {
    record: &'a FileRecord,
    next: usize,
    hasher: ContentHasher,
}

impl<'a> HashFrame<'a> {
    fn new(record: &'a FileRecord) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.hash(&record.content_hash);
        Self {
            record,
            next: 0,
            hasher,
        }
    }
}
