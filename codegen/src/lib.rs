//! bitsift-codegen — x86-64 JIT code generator for bit-sliced row
//! matching.
//!
//! Given a pre-planned row intersection expression and its register
//! assignment, [`compile`] emits a function that scans slice buffers
//! quadword by quadword, accumulates per-document match bits in a
//! two-level dedupe bitmap, and drains them into (slice, document)
//! match records in a caller-supplied array.

pub mod code_buffer;
pub mod error;
pub mod label;
pub mod matcher;
pub mod rows;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
pub use error::CompileError;
pub use matcher::{compile, CompiledMatcher, MatchParams, MatchRecord};
pub use rows::{RegisterMap, RowExpr};
pub use x86_64::Reg;
