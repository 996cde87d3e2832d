use thiserror::Error;

/// Errors surfaced synchronously from query parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty query expression")]
    EmptyExpression,

    #[error("expected ')' to close a group")]
    UnbalancedParen,

    #[error("phrase is missing its closing quote")]
    UnterminatedPhrase,

    #[error("expected a term")]
    EmptyGram,

    #[error("unknown stream name: {0}")]
    UnknownStream(String),

    #[error("unexpected trailing input at byte {0}")]
    TrailingInput(usize),

    #[error("escape sequence at end of input")]
    DanglingEscape,

    #[error("escapes produced an invalid UTF-8 gram")]
    InvalidUtf8,
}
