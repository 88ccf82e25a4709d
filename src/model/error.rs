use thiserror::Error;

use crate::utils::MathError;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Sequence of {len} tokens exceeds the maximum context of {max}")]
    SequenceTooLong { len: usize, max: usize },

    #[error("Token id {id} out of range for vocabulary of {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    #[error("Ragged batch: sequence {index} has length {len}, expected {expected}")]
    RaggedBatch { index: usize, len: usize, expected: usize },

    #[error("Loss error: {0}")]
    Loss(#[from] MathError),
}

impl From<ndarray::ShapeError> for ModelError {
    fn from(error: ndarray::ShapeError) -> Self {
        ModelError::DimensionMismatch(error.to_string())
    }
}
