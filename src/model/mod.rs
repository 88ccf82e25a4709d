//! Decoder-only transformer language model

pub mod attention;
mod config;
mod error;
pub mod layers;
mod positional;
pub mod state;
mod transformer;

use std::sync::Arc;

use ndarray::{s, Array1, Array3, ArrayViewD, ArrayViewMutD, Axis};
use rand::rngs::SmallRng;

pub use attention::{AttentionConfig, CausalMask, CausalSelfAttention};
pub use config::ModelConfig;
pub use error::ModelError;
pub use layers::{Embedding, FeedForwardNetwork, LayerNorm, Linear};
pub use positional::SinusoidalPositionalEncoding;
pub use state::{NamedParameters, StateDict, TensorRecord};
pub use transformer::TransformerBlock;

use crate::utils::{cross_entropy, Device, ExecutionContext};
use state::join;

/// Logits and, in training mode, the mean cross-entropy loss.
#[derive(Debug)]
pub struct ModelOutput {
    pub logits: Array3<f32>,
    pub loss: Option<f32>,
}

/// Complete language model: token embedding, sinusoidal positions,
/// `num_layers` transformer blocks, final norm and a bias-free vocabulary head.
///
/// Parameters are never mutated by a forward pass, so one instance can be
/// shared across threads for concurrent generation.
#[derive(Debug, Clone)]
pub struct LanguageModel {
    config: ModelConfig,
    device: Device,
    embedding: Embedding,
    positional_encoding: SinusoidalPositionalEncoding,
    blocks: Vec<TransformerBlock>,
    ln_f: LayerNorm,
    lm_head: Linear,
}

impl LanguageModel {
    /// Creates a new model with initialized weights
    pub fn new(config: ModelConfig, ctx: &ExecutionContext) -> Result<Self, ModelError> {
        config.validate()?;
        let mut rng = ctx.rng();

        let embedding = Embedding::new(config.vocab_size, config.embed_dim, &mut rng)?;
        let positional_encoding = SinusoidalPositionalEncoding::new(config.block_size, config.embed_dim);
        let mask = Arc::new(CausalMask::new(config.block_size));

        let blocks = (0..config.num_layers)
            .map(|_| TransformerBlock::new(&config, Arc::clone(&mask), &mut rng))
            .collect::<Result<Vec<_>, _>>()?;

        let ln_f = LayerNorm::new(config.embed_dim, config.layer_norm_eps);
        let lm_head = Linear::new(config.embed_dim, config.vocab_size, false, &mut rng)?;

        log::debug!(
            "initialised model: {} layers, {} heads, d_model {}, vocab {}",
            config.num_layers,
            config.n_heads,
            config.embed_dim,
            config.vocab_size
        );

        Ok(Self {
            config,
            device: ctx.device,
            embedding,
            positional_encoding,
            blocks,
            ln_f,
            lm_head,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn max_seq_len(&self) -> usize {
        self.config.block_size
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    pub fn blocks(&self) -> &[TransformerBlock] {
        &self.blocks
    }

    /// Inference forward pass.
    ///
    /// `token_ids` is a batch of equal-length sequences no longer than
    /// `max_seq_len`; the result has shape `[batch_size, seq_len, vocab_size]`.
    pub fn forward(&self, token_ids: &[Vec<usize>]) -> Result<Array3<f32>, ModelError> {
        self.run(token_ids, None)
    }

    /// Training forward pass: dropout is active and the mean cross-entropy
    /// over every position is returned alongside the logits.
    pub fn forward_train(
        &self,
        token_ids: &[Vec<usize>],
        targets: &[Vec<usize>],
        rng: &mut SmallRng,
    ) -> Result<ModelOutput, ModelError> {
        self.forward_with_loss(token_ids, targets, Some(rng))
    }

    /// Like [`forward_train`](Self::forward_train) without dropout.
    pub fn evaluate(&self, token_ids: &[Vec<usize>], targets: &[Vec<usize>]) -> Result<ModelOutput, ModelError> {
        self.forward_with_loss(token_ids, targets, None)
    }

    fn forward_with_loss(
        &self,
        token_ids: &[Vec<usize>],
        targets: &[Vec<usize>],
        dropout: Option<&mut SmallRng>,
    ) -> Result<ModelOutput, ModelError> {
        if targets.len() != token_ids.len() {
            return Err(ModelError::DimensionMismatch(format!(
                "{} input sequences but {} target sequences",
                token_ids.len(),
                targets.len()
            )));
        }
        for (index, (input, target)) in token_ids.iter().zip(targets).enumerate() {
            if input.len() != target.len() {
                return Err(ModelError::RaggedBatch { index, len: target.len(), expected: input.len() });
            }
        }

        let logits = self.run(token_ids, dropout)?;
        let (batch_size, seq_len, vocab_size) = logits.dim();
        let flat = logits.to_shape((batch_size * seq_len, vocab_size))?;
        let flat_targets: Vec<usize> = targets.iter().flatten().copied().collect();
        let loss = cross_entropy(flat.view(), &flat_targets)?;

        Ok(ModelOutput { logits, loss: Some(loss) })
    }

    /// Logits for the token following `context`, a single unbatched sequence.
    pub fn next_token_logits(&self, context: &[usize]) -> Result<Array1<f32>, ModelError> {
        if context.is_empty() {
            return Err(ModelError::DimensionMismatch("empty context".to_string()));
        }
        let logits = self.forward(&[context.to_vec()])?;
        let last = logits.dim().1 - 1;
        Ok(logits.slice(s![0, last, ..]).to_owned())
    }

    fn run(&self, token_ids: &[Vec<usize>], mut dropout: Option<&mut SmallRng>) -> Result<Array3<f32>, ModelError> {
        if let Some(too_long) = token_ids.iter().find(|seq| seq.len() > self.config.block_size) {
            return Err(ModelError::SequenceTooLong { len: too_long.len(), max: self.config.block_size });
        }

        // Step 1: Embed tokens and positions
        let token_embeddings = self.embedding.forward(token_ids)?;
        let mut hidden_states = self.positional_encoding.forward(token_embeddings.view())?;

        // Step 2: Pass through transformer blocks
        for block in &self.blocks {
            hidden_states = block.forward(hidden_states, dropout.as_deref_mut())?;
        }

        // Step 3: Final norm and projection to vocabulary
        let normed = self.ln_f.forward(hidden_states.view());
        let logits = self.lm_head.forward(normed.view())?;
        debug_assert_eq!(logits.len_of(Axis(2)), self.config.vocab_size);
        Ok(logits)
    }
}

impl NamedParameters for LanguageModel {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        self.embedding.parameters(&join(prefix, "tok_emb"), out);
        for (i, block) in self.blocks.iter().enumerate() {
            block.parameters(&join(prefix, &format!("blocks.{}", i)), out);
        }
        self.ln_f.parameters(&join(prefix, "ln_f"), out);
        self.lm_head.parameters(&join(prefix, "head"), out);
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        self.embedding.parameters_mut(&join(prefix, "tok_emb"), out);
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.parameters_mut(&join(prefix, &format!("blocks.{}", i)), out);
        }
        self.ln_f.parameters_mut(&join(prefix, "ln_f"), out);
        self.lm_head.parameters_mut(&join(prefix, "head"), out);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    pub(crate) fn tiny_config(vocab_size: usize) -> ModelConfig {
        ModelConfig {
            embed_dim: 16,
            vocab_size,
            block_size: 8,
            num_layers: 2,
            n_heads: 4,
            dropout: 0.1,
            layer_norm_eps: 1e-5,
        }
    }

    fn tiny_model() -> LanguageModel {
        LanguageModel::new(tiny_config(50), &ExecutionContext::seeded(7)).unwrap()
    }

    #[test]
    fn test_model_initialization() {
        let model = tiny_model();
        assert_eq!(model.blocks().len(), 2);
        assert_eq!(model.max_seq_len(), 8);
        assert_eq!(model.device(), Device::Cpu);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ModelConfig { n_heads: 3, ..tiny_config(50) };
        assert!(matches!(
            LanguageModel::new(config, &ExecutionContext::cpu()),
            Err(ModelError::ConfigError(_))
        ));
    }

    #[test]
    fn test_forward_pass_shape() {
        let model = tiny_model();
        let output = model.forward(&[vec![1, 2, 3, 4], vec![5, 6, 7, 8]]).unwrap();
        assert_eq!(output.shape(), &[2, 4, 50]);
        assert!(output.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_sequence_too_long() {
        let model = tiny_model();
        let too_long = vec![(0..9).collect::<Vec<usize>>()];
        assert!(matches!(
            model.forward(&too_long),
            Err(ModelError::SequenceTooLong { len: 9, max: 8 })
        ));
        assert!(model.forward(&[(0..8).collect()]).is_ok());
    }

    #[test]
    fn test_empty_batch() {
        let model = tiny_model();
        let output = model.forward(&[]).unwrap();
        assert_eq!(output.shape(), &[0, 0, 50]);
    }

    #[test]
    fn test_seeded_construction_is_reproducible() {
        let a = tiny_model();
        let b = tiny_model();
        assert_eq!(a.state_dict(), b.state_dict());
    }

    #[test]
    fn test_causal_logits_do_not_see_the_future() {
        let model = tiny_model();
        let full = model.forward(&[vec![3, 9, 27, 1, 4]]).unwrap();
        let prefix = model.forward(&[vec![3, 9, 27]]).unwrap();
        for t in 0..3 {
            for v in 0..50 {
                assert_abs_diff_eq!(full[[0, t, v]], prefix[[0, t, v]], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_next_token_logits_is_last_row() {
        let model = tiny_model();
        let logits = model.forward(&[vec![1, 2, 3]]).unwrap();
        let next = model.next_token_logits(&[1, 2, 3]).unwrap();
        assert_eq!(next.len(), 50);
        for v in 0..50 {
            assert_abs_diff_eq!(next[v], logits[[0, 2, v]], epsilon = 1e-6);
        }
        assert!(model.next_token_logits(&[]).is_err());
    }

    #[test]
    fn test_forward_train_returns_loss() {
        let model = tiny_model();
        let mut rng = SmallRng::seed_from_u64(0);
        let output = model
            .forward_train(&[vec![1, 2, 3], vec![4, 5, 6]], &[vec![2, 3, 4], vec![5, 6, 7]], &mut rng)
            .unwrap();
        assert_eq!(output.logits.shape(), &[2, 3, 50]);

        // Near-zero initial weights give close to uniform predictions
        let loss = output.loss.unwrap();
        assert!((loss - (50f32).ln()).abs() < 0.5, "loss {}", loss);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let model = tiny_model();
        let inputs = vec![vec![1, 2, 3, 4]];
        let targets = vec![vec![2, 3, 4, 5]];
        let a = model.evaluate(&inputs, &targets).unwrap();
        let b = model.evaluate(&inputs, &targets).unwrap();
        assert_eq!(a.loss, b.loss);
        assert_eq!(a.logits, model.forward(&inputs).unwrap());
    }

    #[test]
    fn test_forward_train_rejects_mismatched_targets() {
        let model = tiny_model();
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(model.forward_train(&[vec![1, 2]], &[vec![2]], &mut rng).is_err());
        assert!(model.forward_train(&[vec![1, 2]], &[], &mut rng).is_err());
    }

    #[test]
    fn test_parameter_names_match_checkpoint_layout() {
        let dict = tiny_model().state_dict();
        let expected = [
            "tok_emb.weight",
            "blocks.0.ln1.weight",
            "blocks.0.ln1.bias",
            "blocks.0.attn.c_atten.weight",
            "blocks.0.attn.c_atten.bias",
            "blocks.0.attn.c_proj.weight",
            "blocks.0.attn.c_proj.bias",
            "blocks.0.ln2.weight",
            "blocks.0.ff.net.0.weight",
            "blocks.0.ff.net.2.bias",
            "blocks.1.ff.net.2.weight",
            "ln_f.weight",
            "ln_f.bias",
            "head.weight",
        ];
        for name in expected {
            assert!(dict.contains_key(name), "missing {}", name);
        }
        assert!(!dict.contains_key("head.bias"));
        assert_eq!(dict["head.weight"].shape, vec![50, 16]);
        // tok_emb + 12 per block + ln_f + head
        assert_eq!(dict.len(), 1 + 2 * 12 + 2 + 1);
    }

    #[test]
    fn test_model_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LanguageModel>();
    }
}
