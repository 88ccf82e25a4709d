use libm::erff;
use ndarray::{Array, Array1, Array4, ArrayView1, ArrayView2, ArrayViewMut2, Dimension};
use rand::rngs::SmallRng;
use rand::Rng;
use thiserror::Error;

const SQRT_2_INV: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[derive(Error, Debug)]
pub enum MathError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("Target id {target} out of range for {classes} classes")]
    TargetOutOfRange { target: usize, classes: usize },
}

/// Exact GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`.
#[inline]
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + erff(x * SQRT_2_INV))
}

/// Computes softmax along the last dimension of a 2D array.
///
/// Entries equal to negative infinity come out as exactly zero.
pub fn softmax_2d(matrix: &mut ArrayViewMut2<f32>) {
    for mut row in matrix.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| {
            if b.is_nan() || b.is_infinite() { a } else { a.max(b) }
        });

        // Nothing finite to normalise: fall back to uniform
        if max == f32::NEG_INFINITY {
            row.fill(1.0 / row.len() as f32);
            continue;
        }

        let mut sum = 0.0f32;
        for val in row.iter_mut() {
            *val = (*val - max).exp();
            sum += *val;
        }

        for val in row.iter_mut() {
            *val /= sum;
        }
    }
}

/// Computes softmax along the last dimension of a 4D array
/// `[batch_size, num_heads, seq_len, seq_len]`.
pub fn softmax_4d(matrix: &mut Array4<f32>) {
    for mut batch in matrix.outer_iter_mut() {
        for mut head in batch.outer_iter_mut() {
            softmax_2d(&mut head);
        }
    }
}

/// Softmax of a single logit vector.
pub fn softmax_1d(logits: ArrayView1<f32>) -> Array1<f32> {
    let mut probs = logits.to_owned().insert_axis(ndarray::Axis(0));
    softmax_2d(&mut probs.view_mut());
    probs.remove_axis(ndarray::Axis(0))
}

/// Inverted dropout: zeroes each element with probability `rate` and
/// rescales the survivors by `1 / (1 - rate)`.
pub fn apply_dropout<D: Dimension>(x: &mut Array<f32, D>, rate: f32, rng: &mut SmallRng) {
    if rate <= 0.0 {
        return;
    }

    let keep_prob = 1.0 - rate;
    x.mapv_inplace(|v| {
        if rng.gen::<f32>() < keep_prob {
            v / keep_prob
        } else {
            0.0
        }
    });
}

/// Mean cross-entropy over the rows of `logits` (`[positions, classes]`).
pub fn cross_entropy(logits: ArrayView2<f32>, targets: &[usize]) -> Result<f32, MathError> {
    if logits.nrows() != targets.len() {
        return Err(MathError::DimensionMismatch(format!(
            "Expected {} rows, got {}",
            targets.len(),
            logits.nrows()
        )));
    }
    if targets.is_empty() {
        return Err(MathError::DimensionMismatch("no positions to score".to_string()));
    }

    let classes = logits.ncols();
    let mut loss = 0.0;
    for (i, &target) in targets.iter().enumerate() {
        if target >= classes {
            return Err(MathError::TargetOutOfRange { target, classes });
        }
        let row = logits.row(i);
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let sum_exp: f32 = row.iter().map(|&x| (x - max).exp()).sum();
        let log_prob = (row[target] - max) - sum_exp.ln();
        loss -= log_prob;
    }

    Ok(loss / targets.len() as f32)
}
