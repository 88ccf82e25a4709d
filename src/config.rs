//! Application configuration, read from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::GenerationConfig;
use crate::model::{ModelConfig, ModelError};
use crate::utils::io::{self, IoError};
use crate::utils::{ExecutionContext, SamplingError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] IoError),
    #[error("Invalid model config: {0}")]
    Model(#[from] ModelError),
    #[error("Invalid generation config: {0}")]
    Generation(#[from] SamplingError),
    #[error("Invalid server config: {0}")]
    Server(String),
}

/// Locations of the artifacts loaded at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub tokenizer: PathBuf,
    pub vocab: PathBuf,
    pub checkpoint: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tokenizer: PathBuf::from("tokenizer.json"),
            vocab: PathBuf::from("vocab.json"),
            checkpoint: PathBuf::from("model.bin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { request_timeout_secs: 30 }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub generation: GenerationConfig,
    pub paths: PathsConfig,
    pub server: ServerConfig,
    pub seed: Option<u64>,
}

impl AppConfig {
    /// Reads `path` if given, otherwise returns the defaults. An explicit
    /// path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let config: AppConfig = io::read_json(path)?;
                log::info!("loaded config from {}", path.display());
                config
            }
            None => AppConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        io::write_json(path, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        self.generation.validate()?;
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Server("request_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn execution_context(&self) -> ExecutionContext {
        match self.seed {
            Some(seed) => ExecutionContext::seeded(seed),
            None => ExecutionContext::cpu(),
        }
    }
}
