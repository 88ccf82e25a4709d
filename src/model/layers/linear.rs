use ndarray::{Array1, Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD};
use ndarray_rand::RandomExt;
use rand::rngs::SmallRng;
use rand_distr::Normal;

use crate::model::state::{join, NamedParameters};
use crate::model::ModelError;

/// A linear (fully-connected) layer, `y = x · Wᵗ + b`.
///
/// The weight is stored `[output_dim, input_dim]`, the layout checkpoints use.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        rng: &mut SmallRng,
    ) -> Result<Self, ModelError> {
        let normal = Normal::new(0.0, 0.02)
            .map_err(|e| ModelError::InitializationError(e.to_string()))?;

        Ok(Self {
            weight: Array2::random_using((output_dim, input_dim), normal, rng),
            bias: bias.then(|| Array1::zeros(output_dim)),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Forward pass for 3D input: [batch_size, seq_len, input_dim]
    pub fn forward(&self, x: ArrayView3<f32>) -> Result<Array3<f32>, ModelError> {
        let (batch_size, seq_len, input_dim) = x.dim();
        if input_dim != self.input_dim() {
            return Err(ModelError::DimensionMismatch(format!(
                "linear expects {} input features, got {}",
                self.input_dim(),
                input_dim
            )));
        }

        let flat = x.to_shape((batch_size * seq_len, input_dim))?;
        let mut output = flat.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            output += bias;
        }

        Ok(output.into_shape((batch_size, seq_len, self.output_dim()))?)
    }
}

impl NamedParameters for Linear {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        out.push((join(prefix, "weight"), self.weight.view().into_dyn()));
        if let Some(bias) = &self.bias {
            out.push((join(prefix, "bias"), bias.view().into_dyn()));
        }
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        out.push((join(prefix, "weight"), self.weight.view_mut().into_dyn()));
        if let Some(bias) = &mut self.bias {
            out.push((join(prefix, "bias"), bias.view_mut().into_dyn()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(17)
    }

    #[test]
    fn test_linear_initialization() {
        let linear = Linear::new(4, 3, true, &mut rng()).unwrap();

        assert_eq!(linear.weight.shape(), &[3, 4]);
        assert_eq!(linear.bias.as_ref().map(|b| b.len()), Some(3));
        assert!(linear.bias.as_ref().unwrap().iter().all(|&b| b == 0.0));

        let no_bias = Linear::new(4, 3, false, &mut rng()).unwrap();
        assert!(no_bias.bias.is_none());
    }

    #[test]
    fn test_initialization_is_small() {
        let linear = Linear::new(64, 64, true, &mut rng()).unwrap();
        let std = linear.weight.std(0.0);
        assert!((std - 0.02).abs() < 0.005, "std {} not near 0.02", std);
    }

    #[test]
    fn test_forward_output_shape() {
        let linear = Linear::new(5, 2, true, &mut rng()).unwrap();
        let input = Array3::<f32>::zeros((2, 3, 5));
        let output = linear.forward(input.view()).unwrap();
        assert_eq!(output.dim(), (2, 3, 2));
    }

    #[test]
    fn test_forward_computation_known_weights() {
        // [out, in] layout
        let weight = array![[1.0, 0.0, -1.0], [2.0, 1.0, 0.0]];
        let linear = Linear { weight, bias: Some(array![0.5, -0.5]) };

        let input = Array::from_shape_vec((1, 1, 3), vec![2.0, 3.0, 4.0]).unwrap();
        let output = linear.forward(input.view()).unwrap();

        // [2 - 4 + 0.5, 4 + 3 - 0.5]
        let expected = Array::from_shape_vec((1, 1, 2), vec![-1.5, 6.5]).unwrap();
        for ((o, e), idx) in output.iter().zip(expected.iter()).zip(0..) {
            assert!((o - e).abs() < 1e-5, "Mismatch at index {}: got {}, expected {}", idx, o, e);
        }
    }

    #[test]
    fn test_forward_rejects_wrong_width() {
        let linear = Linear::new(4, 2, false, &mut rng()).unwrap();
        let input = Array3::<f32>::zeros((1, 1, 3));
        assert!(matches!(linear.forward(input.view()), Err(ModelError::DimensionMismatch(_))));
    }

    #[test]
    fn test_parameter_names() {
        let linear = Linear::new(2, 2, true, &mut rng()).unwrap();
        let dict = linear.state_dict();
        let names: Vec<_> = dict.keys().cloned().collect();
        assert_eq!(names, vec!["bias".to_string(), "weight".to_string()]);
    }
}
