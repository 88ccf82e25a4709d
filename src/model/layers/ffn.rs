use ndarray::{Array3, ArrayView3, ArrayViewD, ArrayViewMutD};
use rand::rngs::SmallRng;

use crate::model::state::{join, NamedParameters};
use crate::model::{Linear, ModelError};
use crate::utils::{apply_dropout, gelu};

/// Position-wise feed-forward sublayer: expand, GELU, project back, dropout.
#[derive(Debug, Clone)]
pub struct FeedForwardNetwork {
    pub linear1: Linear, // d_model -> d_ff
    pub linear2: Linear, // d_ff -> d_model
    pub dropout_rate: f32,
}

impl FeedForwardNetwork {
    pub fn new(d_model: usize, d_ff: usize, dropout_rate: f32, rng: &mut SmallRng) -> Result<Self, ModelError> {
        Ok(Self {
            linear1: Linear::new(d_model, d_ff, true, rng)?,
            linear2: Linear::new(d_ff, d_model, true, rng)?,
            dropout_rate,
        })
    }

    pub fn forward(&self, x: ArrayView3<f32>, dropout: Option<&mut SmallRng>) -> Result<Array3<f32>, ModelError> {
        let hidden = self.linear1.forward(x)?.mapv(gelu);
        let mut output = self.linear2.forward(hidden.view())?;
        if let Some(rng) = dropout {
            apply_dropout(&mut output, self.dropout_rate, rng);
        }
        Ok(output)
    }
}

// PyTorch `nn.Sequential` naming: net.0 is the expansion, net.2 the projection.
impl NamedParameters for FeedForwardNetwork {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
        self.linear1.parameters(&join(prefix, "net.0"), out);
        self.linear2.parameters(&join(prefix, "net.2"), out);
    }

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
        self.linear1.parameters_mut(&join(prefix, "net.0"), out);
        self.linear2.parameters_mut(&join(prefix, "net.2"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};
    use rand::SeedableRng;

    #[test]
    fn test_ffn_output_shape() {
        let ffn = FeedForwardNetwork::new(4, 16, 0.1, &mut SmallRng::seed_from_u64(2)).unwrap();
        let input = Array3::<f32>::zeros((2, 3, 4));
        let output = ffn.forward(input.view(), None).unwrap();
        assert_eq!(output.dim(), (2, 3, 4));
    }

    #[test]
    fn test_ffn_forward_known_weights() {
        let linear1 = Linear { weight: array![[1.0, 0.0], [0.0, 1.0]], bias: Some(array![0.0, 0.0]) };
        let linear2 = Linear { weight: array![[1.0, -1.0], [1.0, 1.0]], bias: Some(array![0.0, 0.0]) };
        let ffn = FeedForwardNetwork { linear1, linear2, dropout_rate: 0.5 };

        let input = Array::from_shape_vec((1, 1, 2), vec![1.0, 2.0]).unwrap();
        let output = ffn.forward(input.view(), None).unwrap();

        let h0 = gelu(1.0);
        let h1 = gelu(2.0);
        let expected = array![[[h0 - h1, h0 + h1]]];

        for ((o, e), i) in output.iter().zip(expected.iter()).zip(0..) {
            assert!((o - e).abs() < 1e-5, "Mismatch at index {}: got {}, expected {}", i, o, e);
        }
    }

    #[test]
    fn test_dropout_only_when_rng_given() {
        let mut rng = SmallRng::seed_from_u64(8);
        let ffn = FeedForwardNetwork::new(8, 32, 0.5, &mut rng).unwrap();
        let input = Array3::from_elem((1, 4, 8), 1.0f32);

        let eval_a = ffn.forward(input.view(), None).unwrap();
        let eval_b = ffn.forward(input.view(), None).unwrap();
        assert_eq!(eval_a, eval_b);

        let train = ffn.forward(input.view(), Some(&mut rng)).unwrap();
        assert!(train.iter().any(|&v| v == 0.0));
    }

    #[test]
    fn test_parameter_names_follow_sequential_layout() {
        let ffn = FeedForwardNetwork::new(2, 8, 0.0, &mut SmallRng::seed_from_u64(0)).unwrap();
        let dict = ffn.state_dict();
        assert_eq!(dict["net.0.weight"].shape, vec![8, 2]);
        assert_eq!(dict["net.2.weight"].shape, vec![2, 8]);
        assert!(dict.contains_key("net.0.bias"));
        assert!(dict.contains_key("net.2.bias"));
    }
}
