use ndarray::{Array1, Array3, ArrayView3, ArrayViewD, ArrayViewMutD, Axis, Zip};

use crate::model::state::{join, NamedParameters};

/// Layer Normalization with learnable parameters
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps,
        }
    }

    /// Normalises every position over its last axis, using the population variance.
    pub fn forward(&self, x: ArrayView3<f32>) -> Array3<f32> {
        let mut output = x.to_owned();
        let n = self.gamma.len() as f32;

        for mut row in output.lanes_mut(Axis(2)) {
            let mean = row.sum() / n;
            let var = row.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / n;
            let std = (var + self.eps).sqrt();

            Zip::from(&mut row)
                .and(&self.gamma)
                .and(&self.beta)
                .for_each(|y, &g, &b| *y = (*y - mean) / std * g + b);
        }

        output
    }
}

impl NamedParameters for LayerNorm {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        out.push((join(prefix, "weight"), self.gamma.view().into_dyn()));
        out.push((join(prefix, "bias"), self.beta.view().into_dyn()));
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        out.push((join(prefix, "weight"), self.gamma.view_mut().into_dyn()));
        out.push((join(prefix, "bias"), self.beta.view_mut().into_dyn()));
    }
}
