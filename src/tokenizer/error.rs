use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::utils::IoError;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Failed to load tokenizer {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Segmentation error: {0}")]
    Segmentation(String),
}

impl TokenizerError {
    pub fn segmentation(e: impl fmt::Display) -> Self {
        TokenizerError::Segmentation(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Failed to load vocabulary {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Duplicate piece {piece:?} at ids {first} and {second}")]
    DuplicatePiece { piece: String, first: usize, second: usize },

    #[error("Reserved token {0} is missing")]
    MissingReservedToken(&'static str),

    #[error("Inconsistent vocabulary: {0}")]
    Inconsistent(String),

    #[error("Unsupported vocabulary version {0}")]
    UnsupportedVersion(u32),
}
