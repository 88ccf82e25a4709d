use ndarray::{s, Array2, Array3, ArrayViewD, ArrayViewMutD};
use ndarray_rand::RandomExt;
use rand::rngs::SmallRng;
use rand_distr::Normal;

use crate::model::state::{join, NamedParameters};
use crate::model::ModelError;

/// Token embedding layer
#[derive(Debug, Clone)]
pub struct Embedding {
    pub weight: Array2<f32>, // Shape: [vocab_size, embed_dim]
}

impl Embedding {
    pub fn new(vocab_size: usize, embed_dim: usize, rng: &mut SmallRng) -> Result<Self, ModelError> {
        let normal = Normal::new(0.0, 0.02)
            .map_err(|e| ModelError::InitializationError(e.to_string()))?;

        Ok(Self {
            weight: Array2::random_using((vocab_size, embed_dim), normal, rng),
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.nrows()
    }

    pub fn embed_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Input shape = [batch_size, seq_len], output = [batch_size, seq_len, embed_dim].
    ///
    /// Every sequence in the batch must have the same length.
    pub fn forward(&self, indices: &[Vec<usize>]) -> Result<Array3<f32>, ModelError> {
        let batch_size = indices.len();
        let seq_len = indices.first().map_or(0, Vec::len);

        let mut output = Array3::zeros((batch_size, seq_len, self.embed_dim()));

        for (b, sequence) in indices.iter().enumerate() {
            if sequence.len() != seq_len {
                return Err(ModelError::RaggedBatch { index: b, len: sequence.len(), expected: seq_len });
            }
            for (t, &token_id) in sequence.iter().enumerate() {
                if token_id >= self.vocab_size() {
                    return Err(ModelError::TokenOutOfRange { id: token_id, vocab_size: self.vocab_size() });
                }
                output.slice_mut(s![b, t, ..]).assign(&self.weight.row(token_id));
            }
        }

        Ok(output)
    }
}

impl NamedParameters for Embedding {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        out.push((join(prefix, "weight"), self.weight.view().into_dyn()));
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        out.push((join(prefix, "weight"), self.weight.view_mut().into_dyn()));
    }
}
