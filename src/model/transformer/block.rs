use std::sync::Arc;

use ndarray::{Array3, ArrayViewD, ArrayViewMutD};
use rand::rngs::SmallRng;

use crate::model::attention::{AttentionConfig, CausalMask, CausalSelfAttention};
use crate::model::layers::{FeedForwardNetwork, LayerNorm};
use crate::model::state::{join, NamedParameters};
use crate::model::{ModelConfig, ModelError};

/// A single pre-norm transformer block:
/// `x + Attention(LN(x))`, then `x + FeedForward(LN(x))`.
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    ln1: LayerNorm,
    attention: CausalSelfAttention,
    ln2: LayerNorm,
    ffn: FeedForwardNetwork,
}

impl TransformerBlock {
    pub fn new(config: &ModelConfig, mask: Arc<CausalMask>, rng: &mut SmallRng) -> Result<Self, ModelError> {
        let attn_config = AttentionConfig {
            embed_dim: config.embed_dim,
            num_heads: config.n_heads,
            dropout_rate: config.dropout,
        };

        Ok(Self {
            ln1: LayerNorm::new(config.embed_dim, config.layer_norm_eps),
            attention: CausalSelfAttention::new(&attn_config, mask, rng)?,
            ln2: LayerNorm::new(config.embed_dim, config.layer_norm_eps),
            ffn: FeedForwardNetwork::new(config.embed_dim, config.d_ff(), config.dropout, rng)?,
        })
    }

    pub fn attention(&self) -> &CausalSelfAttention {
        &self.attention
    }

    pub fn forward(&self, x: Array3<f32>, mut dropout: Option<&mut SmallRng>) -> Result<Array3<f32>, ModelError> {
        // Self-attention + residual
        let norm1 = self.ln1.forward(x.view());
        let x = x + self.attention.forward(norm1.view(), dropout.as_deref_mut())?;

        // FFN + residual
        let norm2 = self.ln2.forward(x.view());
        let x = x + self.ffn.forward(norm2.view(), dropout)?;
        Ok(x)
    }
}

impl NamedParameters for TransformerBlock {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        self.ln1.parameters(&join(prefix, "ln1"), out);
        self.attention.parameters(&join(prefix, "attn"), out);
        self.ln2.parameters(&join(prefix, "ln2"), out);
        self.ffn.parameters(&join(prefix, "ff"), out);
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        self.ln1.parameters_mut(&join(prefix, "ln1"), out);
        self.attention.parameters_mut(&join(prefix, "attn"), out);
        self.ln2.parameters_mut(&join(prefix, "ln2"), out);
        self.ffn.parameters_mut(&join(prefix, "ff"), out);
    }
}
