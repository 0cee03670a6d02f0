//! Function-level lowered-code cache.
//!
//! Keys are sub-IR hashes, so a function is reused whenever its own body and
//! the signatures it calls are unchanged, regardless of which file it sits in
//! or what happened to its siblings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use minic_common::ContentHash;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::persist;
use crate::pipeline::{CodeGenerator, ModuleIr};
use crate::store::{BlobId, ContentStore};

/// Subdirectory holding function-level blobs.
const OBJECTS_SUBDIR: &str = "objects";

/// Name of the index file within the cache directory.
const INDEX_FILE: &str = "function_cache.bin";

/// Hit/miss counts from lowering one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionStats {
    /// Functions whose lowered code came from the cache.
    pub hits: usize,
    /// Functions that had to be lowered.
    pub misses: usize,
}

/// Cache of lowered function bodies keyed by sub-IR hash.
pub struct FunctionArtifactCache {
    cache_dir: PathBuf,
    entries: HashMap<ContentHash, BlobId>,
    store: ContentStore,
    compiler_version: String,
}

impl FunctionArtifactCache {
    /// Opens the cache under `cache_dir`, restoring its index if present.
    pub fn load(cache_dir: &Path, compiler_version: &str) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            entries: persist::load_index(&cache_dir.join(INDEX_FILE), compiler_version),
            store: ContentStore::on_disk(&cache_dir.join(OBJECTS_SUBDIR)),
            compiler_version: compiler_version.to_string(),
        }
    }

    /// Returns the lowered code stored for a sub-IR hash.
    pub fn lookup(&self, sub_ir_hash: &ContentHash) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(blob) = self.entries.get(sub_ir_hash) else {
            return Ok(None);
        };
        let code = self.store.get(blob)?;
        if code.is_none() {
            warn!(key = %sub_ir_hash, blob = %blob, "lowered function missing from store");
        }
        Ok(code)
    }

    /// Records the lowered code for a sub-IR hash.
    pub fn store(&mut self, sub_ir_hash: ContentHash, code: &[u8]) -> Result<(), CacheError> {
        let blob = self.store.put(code)?;
        self.entries.insert(sub_ir_hash, blob);
        Ok(())
    }

    /// Number of cached functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
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
}

/// Lowers every function of a module, consulting `cache` first.
///
/// Lowered bodies are concatenated in source order. Without a cache every
/// function is lowered and counted as a miss.
pub fn lower_module(
    path: &Path,
    module: &ModuleIr,
    codegen: &dyn CodeGenerator,
    mut cache: Option<&mut FunctionArtifactCache>,
) -> Result<(Vec<u8>, FunctionStats), CacheError> {
    let mut output = Vec::new();
    let mut stats = FunctionStats::default();

    for function in &module.functions {
        let key = function.sub_ir_hash();

        if let Some(cache) = cache.as_deref() {
            if let Some(code) = cache.lookup(&key)? {
                stats.hits += 1;
                output.extend_from_slice(&code);
                continue;
            }
        }

        let code = codegen
            .lower_function(function)
            .map_err(|e| CacheError::Codegen {
                path: path.to_path_buf(),
                function: function.name.clone(),
                source: e,
            })?;
        stats.misses += 1;
        if let Some(cache) = cache.as_deref_mut() {
            cache.store(key, &code)?;
        }
        output.extend_from_slice(&code);
    }

    debug!(
        path = %path.display(),
        hits = stats.hits,
        misses = stats.misses,
        "lowered module"
    );
    Ok((output, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FunctionIr;
    use minic_common::{StageError, StageResult};
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingCodegen {
        lowered: Cell<usize>,
    }

    impl CodeGenerator for CountingCodegen {
        fn lower_function(&self, function: &FunctionIr) -> StageResult<Vec<u8>> {
            self.lowered.set(self.lowered.get() + 1);
            if function.instructions == b"bad" {
                return Err(StageError::new("cannot lower"));
            }
            let body = String::from_utf8_lossy(&function.instructions);
            Ok(format!("{}:\n  {body}\n  ret\n", function.name).into_bytes())
        }
    }

    fn func(name: &str, body: &str) -> FunctionIr {
        FunctionIr {
            name: name.to_string(),
            signature: "(i32, i32) i32".to_string(),
            instructions: body.as_bytes().to_vec(),
            callees: vec![],
        }
    }

    fn module(functions: Vec<FunctionIr>) -> ModuleIr {
        ModuleIr { functions }
    }

    #[test]
    fn lookup_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FunctionArtifactCache::load(dir.path(), "0.1.0");
        let key = func("f", "x + y").sub_ir_hash();
        assert!(cache.lookup(&key).unwrap().is_none());

        cache.store(key, b"f:\n  ret\n").unwrap();
        assert_eq!(cache.lookup(&key).unwrap().unwrap(), b"f:\n  ret\n");
    }

    #[test]
    fn lower_module_reuses_cached_functions() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FunctionArtifactCache::load(dir.path(), "0.1.0");
        let codegen = CountingCodegen::default();
        let m = module(vec![func("f0", "x + y"), func("f1", "x * y")]);

        let (first, stats) =
            lower_module(Path::new("a.mini"), &m, &codegen, Some(&mut cache)).unwrap();
        assert_eq!(stats, FunctionStats { hits: 0, misses: 2 });

        let (second, stats) =
            lower_module(Path::new("a.mini"), &m, &codegen, Some(&mut cache)).unwrap();
        assert_eq!(stats, FunctionStats { hits: 2, misses: 0 });
        assert_eq!(first, second);
        assert_eq!(codegen.lowered.get(), 2);
    }

    #[test]
    fn sibling_change_keeps_other_functions_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FunctionArtifactCache::load(dir.path(), "0.1.0");
        let codegen = CountingCodegen::default();

        let v1 = module(vec![func("f0", "x + y"), func("f1", "x * y")]);
        lower_module(Path::new("a.mini"), &v1, &codegen, Some(&mut cache)).unwrap();

        let v2 = module(vec![func("f0", "x + y"), func("f1", "x - y")]);
        let (_, stats) =
            lower_module(Path::new("a.mini"), &v2, &codegen, Some(&mut cache)).unwrap();
        assert_eq!(stats, FunctionStats { hits: 1, misses: 1 });
    }

    #[test]
    fn identical_functions_share_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FunctionArtifactCache::load(dir.path(), "0.1.0");
        let codegen = CountingCodegen::default();

        let a = module(vec![func("helper", "x + 1")]);
        let b = module(vec![func("helper", "x + 1")]);
        lower_module(Path::new("a.mini"), &a, &codegen, Some(&mut cache)).unwrap();
        let (_, stats) =
            lower_module(Path::new("b.mini"), &b, &codegen, Some(&mut cache)).unwrap();

        assert_eq!(stats.hits, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(codegen.lowered.get(), 1);
    }

    #[test]
    fn without_cache_everything_is_lowered() {
        let codegen = CountingCodegen::default();
        let m = module(vec![func("f0", "x + y")]);
        let (_, stats) = lower_module(Path::new("a.mini"), &m, &codegen, None).unwrap();
        let (_, again) = lower_module(Path::new("a.mini"), &m, &codegen, None).unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(again.misses, 1);
        assert_eq!(codegen.lowered.get(), 2);
    }

    #[test]
    fn codegen_failure_names_function() {
        let codegen = CountingCodegen::default();
        let m = module(vec![func("broken", "bad")]);
        let err = lower_module(Path::new("a.mini"), &m, &codegen, None).unwrap_err();
        match err {
            CacheError::Codegen { path, function, .. } => {
                assert_eq!(path, PathBuf::from("a.mini"));
                assert_eq!(function, "broken");
            }
            other => panic!("expected codegen error, got {other}"),
        }
    }

    #[test]
    fn index_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let key = func("f", "x").sub_ir_hash();
        {
            let mut cache = FunctionArtifactCache::load(dir.path(), "0.1.0");
            cache.store(key, b"f").unwrap();
            cache.save().unwrap();
        }
        let cache = FunctionArtifactCache::load(dir.path(), "0.1.0");
        assert_eq!(cache.lookup(&key).unwrap().unwrap(), b"f");
    }
}
