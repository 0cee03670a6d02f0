//! A toy front end and code generator for driving the cache end to end.
//!
//! Source format, one declaration per line:
//!
//! ```text
//! import b.mini
//! fn func_a_0 = m1.func_b_0 + 1
//! fn func_a_1 = x * y
//! ```
//!
//! Words containing a `.` in a function body are calls into other modules
//! and become part of the function's callee signatures.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use minic_cache::{CodeGenerator, Frontend, FunctionIr, MemorySources, ModuleIr};
use minic_common::{StageError, StageResult};

pub const VERSION: &str = "0.1.0-test";

pub struct ToyFrontend {
    pub compiled: RefCell<Vec<PathBuf>>,
}

impl ToyFrontend {
    pub fn new() -> Self {
        Self {
            compiled: RefCell::new(Vec::new()),
        }
    }

    pub fn compiled(&self) -> Vec<PathBuf> {
        self.compiled.borrow().clone()
    }

    pub fn reset(&self) {
        self.compiled.borrow_mut().clear();
    }
}

fn text(source: &[u8]) -> StageResult<&str> {
    std::str::from_utf8(source).map_err(|e| StageError::new(e.to_string()))
}

impl Frontend for ToyFrontend {
    fn scan_imports(&self, _path: &Path, source: &[u8]) -> StageResult<Vec<PathBuf>> {
        Ok(text(source)?
            .lines()
            .filter_map(|line| line.strip_prefix("import "))
            .map(|p| PathBuf::from(p.trim()))
            .collect())
    }

    fn compile(&self, path: &Path, source: &[u8]) -> StageResult<ModuleIr> {
        self.compiled.borrow_mut().push(path.to_path_buf());
        let mut functions = Vec::new();
        for line in text(source)?.lines() {
            let Some(decl) = line.strip_prefix("fn ") else {
                if line.starts_with("import ") || line.trim().is_empty() {
                    continue;
                }
                return Err(StageError::new(format!("unexpected line `{line}`")));
            };
            let (name, body) = decl
                .split_once(" = ")
                .ok_or_else(|| StageError::new(format!("missing body in `{line}`")))?;
            let callees = body
                .split_whitespace()
                .filter(|word| word.contains('.'))
                .map(|word| format!("{word}(i32, i32) i32"))
                .collect();
            functions.push(FunctionIr {
                name: name.trim().to_string(),
                signature: "(i32, i32) i32".to_string(),
                instructions: body.trim().as_bytes().to_vec(),
                callees,
            });
        }
        Ok(ModuleIr { functions })
    }
}

pub struct ToyCodegen {
    pub lowered: RefCell<Vec<String>>,
    pub calls: Cell<usize>,
}

impl ToyCodegen {
    pub fn new() -> Self {
        Self {
            lowered: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    pub fn lowered(&self) -> Vec<String> {
        self.lowered.borrow().clone()
    }

    pub fn reset(&self) {
        self.lowered.borrow_mut().clear();
    }
}

impl CodeGenerator for ToyCodegen {
    fn lower_function(&self, function: &FunctionIr) -> StageResult<Vec<u8>> {
        self.calls.set(self.calls.get() + 1);
        self.lowered.borrow_mut().push(function.name.clone());
        let body = String::from_utf8_lossy(&function.instructions);
        Ok(format!("{}:\n  ; {body}\n  ret\n", function.name).into_bytes())
    }
}

/// A -> B -> C, with one function in A and B that does not touch C.
pub fn chain_tree() -> MemorySources {
    let mut sources = MemorySources::new();
    sources.insert(
        "a.mini",
        1,
        "import b.mini\nfn func_a_0 = mb.func_b_0 + 1\nfn func_a_1 = x * y\n",
    );
    sources.insert(
        "b.mini",
        1,
        "import c.mini\nfn func_b_0 = mc.func_c_0 + 2\nfn func_b_1 = x - y\n",
    );
    sources.insert("c.mini", 1, "fn func_c_0 = x + y\n");
    sources
}

pub fn roots(paths: &[&str]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}
