use std::sync::Arc;

use ndarray::{s, Array3, Array4, ArrayView3, ArrayViewD, ArrayViewMutD};
use rand::rngs::SmallRng;

use crate::model::attention::CausalMask;
use crate::model::state::{join, NamedParameters};
use crate::model::{Linear, ModelError};
use crate::utils::{apply_dropout, softmax_4d};

#[derive(Debug, Clone)]
pub struct AttentionConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    pub dropout_rate: f32,
}

/// Multi-head masked self-attention with a fused query/key/value projection.
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    pub c_attn: Linear, // [3 * embed_dim, embed_dim]
    pub c_proj: Linear, // output projection
    num_heads: usize,
    head_dim: usize,
    dropout_rate: f32,
    mask: Arc<CausalMask>,
}

impl CausalSelfAttention {
    pub fn new(config: &AttentionConfig, mask: Arc<CausalMask>, rng: &mut SmallRng) -> Result<Self, ModelError> {
        if config.num_heads == 0 || config.embed_dim % config.num_heads != 0 {
            return Err(ModelError::ConfigError(format!(
                "embed_dim {} must be divisible by num_heads {}",
                config.embed_dim, config.num_heads
            )));
        }

        Ok(Self {
            c_attn: Linear::new(config.embed_dim, 3 * config.embed_dim, true, rng)?,
            c_proj: Linear::new(config.embed_dim, config.embed_dim, true, rng)?,
            num_heads: config.num_heads,
            head_dim: config.embed_dim / config.num_heads,
            dropout_rate: config.dropout_rate,
            mask,
        })
    }

    pub fn embed_dim(&self) -> usize {
        self.num_heads * self.head_dim
    }

    pub fn forward(
        &self,
        x: ArrayView3<f32>, // [batch_size, seq_len, embed_dim]
        dropout: Option<&mut SmallRng>,
    ) -> Result<Array3<f32>, ModelError> {
        self.forward_with_weights(x, dropout).map(|(output, _)| output)
    }

    /// Like [`forward`](Self::forward), also returning the attention
    /// weights `[batch_size, num_heads, seq_len, seq_len]`.
    pub fn forward_with_weights(
        &self,
        x: ArrayView3<f32>,
        mut dropout: Option<&mut SmallRng>,
    ) -> Result<(Array3<f32>, Array4<f32>), ModelError> {
        let d = self.embed_dim();

        // 1. Fused projection, then split into Q, K, V heads
        let qkv = self.c_attn.forward(x)?;
        let q_heads = self.split_heads(qkv.slice(s![.., .., 0..d]))?;
        let k_heads = self.split_heads(qkv.slice(s![.., .., d..2 * d]))?;
        let v_heads = self.split_heads(qkv.slice(s![.., .., 2 * d..3 * d]))?;

        // 2. Masked scaled dot-product attention
        let (attn_weights, output) =
            self.scaled_dot_product_attention(&q_heads, &k_heads, &v_heads, dropout.as_deref_mut())?;

        // 3. Merge heads, project, residual dropout
        let merged = self.merge_heads(output)?;
        let mut output = self.c_proj.forward(merged.view())?;
        if let Some(rng) = dropout {
            apply_dropout(&mut output, self.dropout_rate, rng);
        }

        Ok((output, attn_weights))
    }

    /// `[batch, seq, embed_dim]` -> `[batch, heads, seq, head_dim]`
    fn split_heads(&self, x: ArrayView3<f32>) -> Result<Array4<f32>, ModelError> {
        let (batch_size, seq_len, _) = x.dim();
        let heads = x
            .to_shape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .permuted_axes([0, 2, 1, 3]);
        Ok(heads.as_standard_layout().into_owned())
    }

    /// `[batch, heads, seq, head_dim]` -> `[batch, seq, embed_dim]`
    fn merge_heads(&self, x: Array4<f32>) -> Result<Array3<f32>, ModelError> {
        let (batch_size, num_heads, seq_len, head_dim) = x.dim();
        let merged = x.permuted_axes([0, 2, 1, 3]).as_standard_layout().into_owned();
        Ok(merged.into_shape((batch_size, seq_len, num_heads * head_dim))?)
    }

    fn scaled_dot_product_attention(
        &self,
        q: &Array4<f32>, // [batch_size, num_heads, seq_len, head_dim]
        k: &Array4<f32>,
        v: &Array4<f32>,
        dropout: Option<&mut SmallRng>,
    ) -> Result<(Array4<f32>, Array4<f32>), ModelError> {
        let (batch_size, num_heads, seq_len, head_dim) = q.dim();
        let scale = 1.0 / (head_dim as f32).sqrt();

        let mut scores = Array4::<f32>::zeros((batch_size, num_heads, seq_len, seq_len));
        for b in 0..batch_size {
            for h in 0..num_heads {
                let q_head = q.slice(s![b, h, .., ..]);
                let k_head = k.slice(s![b, h, .., ..]);
                let dot = q_head.dot(&k_head.t()) * scale;
                scores.slice_mut(s![b, h, .., ..]).assign(&dot);
            }
        }

        self.mask.apply(&mut scores)?;

        let mut attn_weights = scores;
        softmax_4d(&mut attn_weights);

        if let Some(rng) = dropout {
            apply_dropout(&mut attn_weights, self.dropout_rate, rng);
        }

        let mut output = Array4::<f32>::zeros((batch_size, num_heads, seq_len, head_dim));
        for b in 0..batch_size {
            for h in 0..num_heads {
                let weights = attn_weights.slice(s![b, h, .., ..]);
                let values = v.slice(s![b, h, .., ..]);
                output.slice_mut(s![b, h, .., ..]).assign(&weights.dot(&values));
            }
        }

        Ok((attn_weights, output))
    }
}

impl NamedParameters for CausalSelfAttention {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        self.c_attn.parameters(&join(prefix, "c_atten"), out);
        self.c_proj.parameters(&join(prefix, "c_proj"), out);
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        self.c_attn.parameters_mut(&join(prefix, "c_atten"), out);
        self.c_proj.parameters_mut(&join(prefix, "c_proj"), out);
    }
}
