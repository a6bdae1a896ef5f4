//! Error types for the fused cross-entropy kernels
//!
//! Every failure here is a caller or configuration error detected before a
//! kernel launch. Nothing in a row sweep can fail once it has started.

use thiserror::Error;

/// Errors raised at kernel launch boundaries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrossEntropyError {
    /// The vocabulary does not fit in a single row block.
    ///
    /// The caller must tile the vocabulary dimension itself.
    #[error(
        "cannot launch fused cross-entropy: vocab_size = {vocab_size} needs block size \
         {block_size}, which exceeds the maximum fused size {max}"
    )]
    Configuration {
        vocab_size: usize,
        block_size: usize,
        max: usize,
    },

    /// Two inputs disagree on a dimension.
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A shape whose element span does not fit in `usize`.
    #[error("shape overflow for {what}: element span exceeds usize")]
    ShapeOverflow { what: &'static str },

    /// Row stride shorter than a row.
    #[error("row stride {row_stride} is smaller than vocab_size {vocab_size}")]
    InvalidStride { row_stride: usize, vocab_size: usize },

    /// Label that is neither the ignore sentinel nor a class index.
    #[error("label {label} at row {row} is outside [0, {vocab_size}) and is not the ignore index")]
    LabelOutOfRange {
        row: usize,
        label: i64,
        vocab_size: usize,
    },

    /// Caller-supplied token count that cannot normalise a loss.
    #[error("n_items must be positive, got {0}")]
    InvalidItemCount(usize),

    /// Malformed loss configuration.
    #[error("invalid loss configuration: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CrossEntropyError>;

impl From<serde_json::Error> for CrossEntropyError {
    fn from(e: serde_json::Error) -> Self {
        CrossEntropyError::Config(e.to_string())
    }
}
