use thiserror::Error;

/// Malformed input detected before any computation starts. Always fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{what}: expected {expected} entries, found {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("item {index} has no embedding")]
    MissingEmbedding { index: usize },

    #[error("item {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("lesson id at position {position} is {id}; ids must run 0..N-1")]
    NonSequentialId { position: usize, id: u32 },

    #[error("line {line}: {message}")]
    BadRow { line: usize, message: String },

    #[error("seed lesson {id} is outside the index ({len} lessons)")]
    SeedOutOfRange { id: usize, len: usize },
}
