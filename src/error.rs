use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::generation::GenerationError;
use crate::model::ModelError;
use crate::serve::ServeError;
use crate::tokenizer::{TokenizerError, VocabError};
use crate::training::DatasetError;
use crate::utils::IoError;

#[derive(Error, Debug)]
pub enum CodethiumError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error(transparent)]
    Vocab(#[from] VocabError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Serve(#[from] ServeError),
}

pub type Result<T> = std::result::Result<T, CodethiumError>;
