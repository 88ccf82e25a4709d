//! Model checkpoint persistence.
//!
//! The native format is a bincode-encoded [`Checkpoint`]. Exports from the
//! PyTorch training pipeline arrive as `.safetensors` files and are
//! converted once with [`load_safetensors`] followed by [`save_checkpoint`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{LanguageModel, ModelConfig, ModelError, NamedParameters, StateDict, TensorRecord};
use crate::utils::io::{self, IoError};
use crate::utils::ExecutionContext;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Key prefix marking the nested form in flattened exports.
pub const NESTED_PREFIX: &str = "model_state_dict.";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to load checkpoint {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Checkpoint is missing parameters: {0:?}")]
    MissingKeys(Vec<String>),

    #[error("Checkpoint has unexpected parameters: {0:?}")]
    UnexpectedKeys(Vec<String>),

    #[error("Shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch { name: String, expected: Vec<usize>, found: Vec<usize> },

    #[error("Unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported tensor dtype {0}")]
    UnsupportedDtype(String),

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// The parameter mapping, either bare or nested inside training metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckpointPayload {
    StateDict(StateDict),
    Training {
        model_state_dict: StateDict,
        epoch: usize,
        loss: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub payload: CheckpointPayload,
}

impl Checkpoint {
    pub fn bare(state_dict: StateDict) -> Self {
        Self { version: CHECKPOINT_VERSION, payload: CheckpointPayload::StateDict(state_dict) }
    }

    pub fn training(state_dict: StateDict, epoch: usize, loss: f32) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            payload: CheckpointPayload::Training { model_state_dict: state_dict, epoch, loss },
        }
    }

    pub fn from_model(model: &LanguageModel) -> Self {
        Self::bare(model.state_dict())
    }

    /// Resolves either payload form to the parameter mapping.
    pub fn into_state_dict(self) -> StateDict {
        match self.payload {
            CheckpointPayload::StateDict(dict) => dict,
            CheckpointPayload::Training { model_state_dict, .. } => model_state_dict,
        }
    }
}

/// Saves a checkpoint in the native format
pub fn save_checkpoint(path: impl AsRef<Path>, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    let path = path.as_ref();
    io::serialize_to_file(path, checkpoint)?;
    log::info!("saved checkpoint to {}", path.display());
    Ok(())
}

/// Loads a native checkpoint and checks its version.
pub fn read_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint, CheckpointError> {
    let path = path.as_ref();
    let bytes = io::read_bytes(path)?;
    let checkpoint: Checkpoint = bincode::deserialize(&bytes).map_err(|e| CheckpointError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(checkpoint.version));
    }
    Ok(checkpoint)
}

/// Reads a safetensors export.
///
/// When every key carries the `model_state_dict.` prefix the prefix is
/// stripped, so nested and bare exports resolve to the same mapping.
pub fn load_safetensors(path: impl AsRef<Path>) -> Result<StateDict, CheckpointError> {
    let path = path.as_ref();
    let bytes = io::read_bytes(path)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| CheckpointError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let names = tensors.names();
    let nested = !names.is_empty() && names.iter().all(|name| name.starts_with(NESTED_PREFIX));

    let mut dict = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(CheckpointError::UnsupportedDtype(format!("{:?} ({})", view.dtype(), name)));
        }
        let data = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let key = match name.strip_prefix(NESTED_PREFIX) {
            Some(stripped) if nested => stripped.to_string(),
            _ => name,
        };
        dict.insert(key, TensorRecord { shape: view.shape().to_vec(), data });
    }

    log::debug!("read {} tensors from {} (nested: {})", dict.len(), path.display(), nested);
    Ok(dict)
}

/// Writes a mapping as a flat safetensors file.
pub fn save_safetensors(path: impl AsRef<Path>, dict: &StateDict) -> Result<(), CheckpointError> {
    let path = path.as_ref();
    let buffers: Vec<(String, Vec<u8>, &TensorRecord)> = dict
        .iter()
        .map(|(name, record)| {
            let bytes = record.data.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.clone(), bytes, record)
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, bytes, record) in &buffers {
        let view = TensorView::new(Dtype::F32, record.shape.clone(), bytes).map_err(|e| CheckpointError::Load {
            path: path.to_path_buf(),
            reason: format!("{}: {}", name, e),
        })?;
        views.push((name.as_str(), view));
    }

    let serialized = safetensors::serialize(views, &None::<HashMap<String, String>>).map_err(|e| {
        CheckpointError::Load { path: path.to_path_buf(), reason: e.to_string() }
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(IoError::StdIo)?;
    }
    std::fs::write(path, serialized).map_err(IoError::StdIo)?;
    Ok(())
}

/// Reads a parameter mapping from either format, chosen by file extension.
pub fn load_state_dict(path: impl AsRef<Path>) -> Result<StateDict, CheckpointError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("safetensors") => load_safetensors(path),
        _ => Ok(read_checkpoint(path)?.into_state_dict()),
    }
}

/// Builds a model for `config` and fills it from the checkpoint at `path`.
pub fn load_model(
    config: ModelConfig,
    path: impl AsRef<Path>,
    ctx: &ExecutionContext,
) -> Result<LanguageModel, CheckpointError> {
    let path = path.as_ref();
    let dict = load_state_dict(path)?;
    let mut model = LanguageModel::new(config, ctx)?;
    model.load_state_dict(&dict)?;
    log::info!("loaded {} parameters from {}", dict.len(), path.display());
    Ok(model)
}
