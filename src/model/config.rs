use serde::{Deserialize, Serialize};

use super::error::ModelError;

/// Configuration for the language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    // --- Architecture ---
    /// d_model: width of token embeddings and all hidden states
    pub embed_dim: usize,
    /// Number of entries in the vocabulary, including reserved tokens
    pub vocab_size: usize,
    /// max_seq_len: longest context a forward pass accepts
    pub block_size: usize,
    /// Number of stacked transformer blocks
    pub num_layers: usize,
    /// Attention heads per block, must divide `embed_dim`
    pub n_heads: usize,

    // --- Regularization ---
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
}

fn default_dropout() -> f32 { 0.1 }
fn default_layer_norm_eps() -> f32 { 1e-5 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_dim: 256,
            vocab_size: 5000,
            block_size: 512,
            num_layers: 4,
            n_heads: 4,
            dropout: default_dropout(),
            layer_norm_eps: default_layer_norm_eps(),
        }
    }
}

impl ModelConfig {
    /// Hidden width of the feed-forward sublayer.
    pub fn d_ff(&self) -> usize {
        4 * self.embed_dim
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.n_heads
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let sizes = [
            ("embed_dim", self.embed_dim),
            ("vocab_size", self.vocab_size),
            ("block_size", self.block_size),
            ("num_layers", self.num_layers),
            ("n_heads", self.n_heads),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ModelError::ConfigError(format!("{} must be non-zero", name)));
            }
        }
        if self.embed_dim % 2 != 0 {
            return Err(ModelError::ConfigError(format!(
                "embed_dim {} must be even for sinusoidal positions",
                self.embed_dim
            )));
        }
        if self.embed_dim % self.n_heads != 0 {
            return Err(ModelError::ConfigError(format!(
                "embed_dim {} is not divisible by n_heads {}",
                self.embed_dim, self.n_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::ConfigError(format!(
                "dropout {} must lie in [0, 1)",
                self.dropout
            )));
        }
        if !(self.layer_norm_eps > 0.0) {
            return Err(ModelError::ConfigError("layer_norm_eps must be positive".to_string()));
        }
        Ok(())
    }
}
