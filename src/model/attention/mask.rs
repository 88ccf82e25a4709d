use ndarray::{s, Array2, Array4};

use crate::model::ModelError;

/// Lower-triangular `max_len × max_len` mask: `allowed[[i, j]]` iff `j <= i`.
///
/// Built once per model and shared by every attention layer.
#[derive(Debug, Clone)]
pub struct CausalMask {
    allowed: Array2<bool>,
}

impl CausalMask {
    pub fn new(max_len: usize) -> Self {
        Self {
            allowed: Array2::from_shape_fn((max_len, max_len), |(i, j)| j <= i),
        }
    }

    pub fn max_len(&self) -> usize {
        self.allowed.nrows()
    }

    pub fn allows(&self, query: usize, key: usize) -> bool {
        self.allowed[[query, key]]
    }

    /// Sets every future position of `[batch, heads, seq_len, seq_len]`
    /// scores to negative infinity.
    pub fn apply(&self, scores: &mut Array4<f32>) -> Result<(), ModelError> {
        let seq_len = scores.dim().2;
        if seq_len > self.max_len() {
            return Err(ModelError::SequenceTooLong { len: seq_len, max: self.max_len() });
        }

        let allowed = self.allowed.slice(s![..seq_len, ..seq_len]);
        for mut batch in scores.outer_iter_mut() {
            for mut head in batch.outer_iter_mut() {
                head.zip_mut_with(&allowed, |score, &ok| {
                    if !ok {
                        *score = f32::NEG_INFINITY;
                    }
                });
            }
        }
        Ok(())
    }
}
