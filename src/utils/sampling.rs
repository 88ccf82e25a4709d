use ndarray::{Array1, ArrayView1};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use thiserror::Error;

use crate::utils::math::softmax_1d;

/// Score given to candidates removed by the top-k filter.
pub const TOP_K_SUPPRESSED: f32 = -1e9;
/// Score given to candidates removed by the top-p filter.
pub const TOP_P_SUPPRESSED: f32 = -1e10;

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Invalid top_p {0}: must lie in [0, 1]")]
    InvalidTopP(f32),
    #[error("Empty distribution")]
    EmptyDistribution,
    #[error("Degenerate distribution: {0}")]
    Degenerate(String),
}

/// Picks the next token id from a vector of logits.
///
/// Temperature scaling, then top-k, then top-p are applied as successive
/// filters before a categorical draw. A `top_k` of zero or a `top_p` of
/// zero disables the respective filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    temperature: f32,
    top_k: usize,
    top_p: f32,
}

impl Sampler {
    pub fn new(temperature: f32, top_k: usize, top_p: f32) -> Result<Self, SamplingError> {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(SamplingError::InvalidTopP(top_p));
        }
        // Non-positive (or NaN) temperature means "unscaled"
        let temperature = if temperature > 0.0 { temperature } else { 1.0 };
        Ok(Self { temperature, top_k, top_p })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns the logits after temperature, top-k and top-p have been applied.
    pub fn filter(&self, logits: ArrayView1<f32>) -> Array1<f32> {
        let mut scaled = logits.mapv(|x| x / self.temperature);

        if self.top_k > 0 && self.top_k < scaled.len() {
            let sorted = sorted_descending(&scaled);
            let min_kept = sorted[self.top_k - 1];
            scaled.mapv_inplace(|x| if x < min_kept { TOP_K_SUPPRESSED } else { x });
        }

        if self.top_p > 0.0 {
            let sorted = sorted_descending(&scaled);
            let probs = softmax_1d(ArrayView1::from(&sorted[..]));

            let mut cumulative = 0.0f32;
            let cutoff = probs.iter().position(|&p| {
                cumulative += p;
                cumulative > self.top_p
            });

            if let Some(idx) = cutoff {
                let threshold = sorted[idx];
                scaled.mapv_inplace(|x| if x < threshold { TOP_P_SUPPRESSED } else { x });
            }
        }

        scaled
    }

    /// Draws one token id from the filtered distribution.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        logits: ArrayView1<f32>,
        rng: &mut R,
    ) -> Result<usize, SamplingError> {
        if logits.is_empty() {
            return Err(SamplingError::EmptyDistribution);
        }

        let filtered = self.filter(logits);
        let probs = softmax_1d(filtered.view());

        let dist = WeightedIndex::new(probs.iter().copied())
            .map_err(|e| SamplingError::Degenerate(e.to_string()))?;
        Ok(dist.sample(rng))
    }
}

fn sorted_descending(values: &Array1<f32>) -> Vec<f32> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    sorted
}
