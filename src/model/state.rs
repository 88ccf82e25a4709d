//! Named parameter access and the flat tensor mapping used for persistence.

use std::collections::BTreeMap;

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointError;

/// A dense `f32` tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn from_view(view: ArrayViewD<f32>) -> Self {
        Self {
            shape: view.shape().to_vec(),
            data: view.iter().copied().collect(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn view(&self) -> Result<ArrayViewD<'_, f32>, ndarray::ShapeError> {
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.data)
    }
}

/// Parameter name to tensor.
pub type StateDict = BTreeMap<String, TensorRecord>;

/// Non-parameter buffers found in exported PyTorch state dicts.
/// They are recomputed at construction and never read from a checkpoint.
pub fn is_buffer_key(name: &str) -> bool {
    name == "pos_emb.pe" || name.ends_with(".attn.casual_mask")
}

pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Exposes a module's trainable tensors under stable dotted names.
pub trait NamedParameters {
    fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>);

    fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>);

    fn state_dict(&self) -> StateDict {
        let mut params = Vec::new();
        self.parameters("", &mut params);
        params
            .into_iter()
            .map(|(name, view)| (name, TensorRecord::from_view(view)))
            .collect()
    }

    /// Copies every parameter from `dict`.
    ///
    /// The whole mapping is checked before anything is written: missing
    /// names, unexpected names (other than known buffers) and shape
    /// mismatches are all reported without touching the module.
    fn load_state_dict(&mut self, dict: &StateDict) -> Result<(), CheckpointError> {
        let expected = self.state_dict();

        let missing: Vec<String> = expected
            .keys()
            .filter(|name| !dict.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CheckpointError::MissingKeys(missing));
        }

        let unexpected: Vec<String> = dict
            .keys()
            .filter(|name| !expected.contains_key(*name) && !is_buffer_key(name))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(CheckpointError::UnexpectedKeys(unexpected));
        }

        for (name, want) in &expected {
            let found = &dict[name];
            if found.shape != want.shape || found.data.len() != found.numel() {
                return Err(CheckpointError::ShapeMismatch {
                    name: name.clone(),
                    expected: want.shape.clone(),
                    found: found.shape.clone(),
                });
            }
        }

        let mut params = Vec::new();
        self.parameters_mut("", &mut params);
        for (name, mut target) in params {
            let source = dict[&name].view().map_err(|e| CheckpointError::ShapeMismatch {
                name: format!("{} ({})", name, e),
                expected: target.shape().to_vec(),
                found: dict[&name].shape.clone(),
            })?;
            target.assign(&source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};

    struct Toy {
        w: Array2<f32>,
        b: Array1<f32>,
    }

    impl NamedParameters for Toy {
        fn parameters<'a>(&'a self, prefix: &str, out: &mut Vec<(String, ArrayViewD<'a, f32>)>) {
            out.push((join(prefix, "w"), self.w.view().into_dyn()));
            out.push((join(prefix, "b"), self.b.view().into_dyn()));
        }

        fn parameters_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, ArrayViewMutD<'a, f32>)>) {
            out.push((join(prefix, "w"), self.w.view_mut().into_dyn()));
            out.push((join(prefix, "b"), self.b.view_mut().into_dyn()));
        }
    }

    fn toy() -> Toy {
        Toy { w: array![[1.0, 2.0], [3.0, 4.0]], b: array![0.5, -0.5] }
    }

    #[test]
    fn test_state_dict_flattens_row_major() {
        let dict = toy().state_dict();
        assert_eq!(dict["w"].shape, vec![2, 2]);
        assert_eq!(dict["w"].data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(dict["b"].data, vec![0.5, -0.5]);
    }

    #[test]
    fn test_load_copies_values_and_ignores_buffers() {
        let mut dict = toy().state_dict();
        dict.get_mut("w").unwrap().data = vec![9.0, 8.0, 7.0, 6.0];
        dict.insert("pos_emb.pe".to_string(), TensorRecord { shape: vec![1], data: vec![0.0] });

        let mut target = Toy { w: Array2::zeros((2, 2)), b: Array1::zeros(2) };
        target.load_state_dict(&dict).unwrap();
        assert_eq!(target.w, array![[9.0, 8.0], [7.0, 6.0]]);
        assert_eq!(target.b, array![0.5, -0.5]);
    }

    #[test]
    fn test_load_reports_missing_unexpected_and_shape() {
        let mut target = toy();

        let mut missing = target.state_dict();
        missing.remove("b");
        assert!(matches!(
            target.load_state_dict(&missing),
            Err(CheckpointError::MissingKeys(keys)) if keys == vec!["b".to_string()]
        ));

        let mut extra = target.state_dict();
        extra.insert("stray".to_string(), TensorRecord { shape: vec![1], data: vec![1.0] });
        assert!(matches!(target.load_state_dict(&extra), Err(CheckpointError::UnexpectedKeys(_))));

        let mut reshaped = target.state_dict();
        reshaped.insert("b".to_string(), TensorRecord { shape: vec![3], data: vec![0.0; 3] });
        assert!(matches!(target.load_state_dict(&reshaped), Err(CheckpointError::ShapeMismatch { .. })));
        assert_eq!(target.b, array![0.5, -0.5]);
    }

    #[test]
    fn test_buffer_keys() {
        assert!(is_buffer_key("pos_emb.pe"));
        assert!(is_buffer_key("blocks.3.attn.casual_mask"));
        assert!(!is_buffer_key("blocks.3.attn.c_proj.weight"));
    }
}
