//! Shared foundational types used across the minic compiler.
//!
//! This crate provides the content hash used for change detection and the
//! error type that pipeline stages report back to the build cache.

#![warn(missing_docs)]

pub mod hash;
pub mod result;

pub use hash::{ContentHash, ContentHasher};
pub use result::{StageError, StageResult};
