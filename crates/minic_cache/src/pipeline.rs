//! Interfaces to the compiler stages the cache drives.
//!
//! The cache never parses or lowers code itself. It asks a [`Frontend`] for a
//! file's imports and IR, and a [`CodeGenerator`] for each function's target
//! text, and decides when those calls can be skipped.

use std::path::{Path, PathBuf};

use minic_common::{ContentHash, ContentHasher, StageResult};

/// Per-file intermediate representation handed over by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleIr {
    /// Functions in source order.
    pub functions: Vec<FunctionIr>,
}

/// The sub-IR of a single function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionIr {
    /// Symbol name.
    pub name: String,
    /// Rendered signature, e.g. `(i32, i32) i32`.
    pub signature: String,
    /// Serialized instruction stream.
    pub instructions: Vec<u8>,
    /// Signatures of the functions this one calls, as `module.name(sig)`.
    pub callees: Vec<String>,
}

impl FunctionIr {
    /// Cache key for the lowered form of this function.
    ///
    /// Covers only the function itself and the signatures it calls, never the
    /// enclosing file, so a function stays cached while its siblings change.
    pub fn sub_ir_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher
            .field(self.name.as_bytes())
            .field(self.signature.as_bytes())
            .field(&self.instructions);
        for callee in &self.callees {
            hasher.field(callee.as_bytes());
        }
        hasher.finish()
    }
}

/// Lexer, parser and type checker.
pub trait Frontend {
    /// Returns the files `source` imports, in declaration order.
    ///
    /// Paths must be resolved the same way the build roots are, since they
    /// are looked up in the same [`SourceTree`](crate::SourceTree).
    fn scan_imports(&self, path: &Path, source: &[u8]) -> StageResult<Vec<PathBuf>>;

    /// Compiles one file to IR.
    fn compile(&self, path: &Path, source: &[u8]) -> StageResult<ModuleIr>;
}

/// Target code generator.
pub trait CodeGenerator {
    /// Lowers one function to target text.
    fn lower_function(&self, function: &FunctionIr) -> StageResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(name: &str, body: &str, callees: &[&str]) -> FunctionIr {
        FunctionIr {
            name: name.to_string(),
            signature: "(i32, i32) i32".to_string(),
            instructions: body.as_bytes().to_vec(),
            callees: callees.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn identical_functions_share_key() {
        let a = func("func_0_1", "x + y", &[]);
        let b = func("func_0_1", "x + y", &[]);
        assert_eq!(a.sub_ir_hash(), b.sub_ir_hash());
    }

    #[test]
    fn body_change_changes_key() {
        let a = func("func_0_1", "x + y", &[]);
        let b = func("func_0_1", "x * y", &[]);
        assert_ne!(a.sub_ir_hash(), b.sub_ir_hash());
    }

    #[test]
    fn callee_signature_changes_key() {
        let a = func("func_0_0", "call", &["m1.func_1_0(i32, i32) i32"]);
        let b = func("func_0_0", "call", &["m1.func_1_0(i64, i64) i64"]);
        assert_ne!(a.sub_ir_hash(), b.sub_ir_hash());
    }

    #[test]
    fn name_is_part_of_key() {
        let a = func("func_0_1", "x + y", &[]);
        let b = func("func_0_2", "x + y", &[]);
        assert_ne!(a.sub_ir_hash(), b.sub_ir_hash());
    }
}
