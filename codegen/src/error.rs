use std::io;

use thiserror::Error;

/// Errors surfaced synchronously from matcher compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("code buffer exhausted while emitting the matcher")]
    BufferExhausted,

    #[error("row plan allocates {0} row registers; at most 7 are available")]
    TooManyRows(usize),

    #[error("row expression nests deeper than the scratch register set")]
    ExpressionTooDeep,

    #[error("row expression references unallocated register {0}")]
    UnallocatedRow(usize),

    #[error("row expression has an empty operand list")]
    EmptyExpression,

    #[error("executable memory: {0}")]
    ExecMemory(#[from] io::Error),
}
