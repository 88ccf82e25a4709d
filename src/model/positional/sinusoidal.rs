use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};

use crate::model::ModelError;

/// Fixed sinusoidal positional encoding.
///
/// Channel `2i` of position `p` holds `sin(p / 10000^(2i/d))`, channel
/// `2i + 1` holds the matching cosine. Precomputed for `max_len` positions.
#[derive(Debug, Clone)]
pub struct SinusoidalPositionalEncoding {
    encoding: Array2<f32>,
}

impl SinusoidalPositionalEncoding {
    pub fn new(max_len: usize, d_model: usize) -> Self {
        let mut encoding = Array2::zeros((max_len, d_model));
        let log_base = (10000.0f32).ln();

        for pos in 0..max_len {
            for i in 0..(d_model / 2) {
                let div_term = (-((2 * i) as f32) * log_base / d_model as f32).exp();
                let angle = pos as f32 * div_term;
                encoding[[pos, 2 * i]] = angle.sin();
                encoding[[pos, 2 * i + 1]] = angle.cos();
            }
        }

        Self { encoding }
    }

    pub fn max_len(&self) -> usize {
        self.encoding.nrows()
    }

    pub fn table(&self) -> ArrayView2<'_, f32> {
        self.encoding.view()
    }

    /// Adds the encoding to `[batch_size, seq_len, d_model]` embeddings.
    pub fn forward(&self, input: ArrayView3<f32>) -> Result<Array3<f32>, ModelError> {
        let (_, seq_len, d_model) = input.dim();
        if seq_len > self.max_len() {
            return Err(ModelError::SequenceTooLong { len: seq_len, max: self.max_len() });
        }
        if d_model != self.encoding.ncols() {
            return Err(ModelError::DimensionMismatch(format!(
                "positional encoding has {} channels, input has {}",
                self.encoding.ncols(),
                d_model
            )));
        }

        let encoding = self.encoding.slice(s![..seq_len, ..]);
        let mut output = input.to_owned();
        for mut batch in output.outer_iter_mut() {
            batch += &encoding;
        }

        Ok(output)
    }
}
