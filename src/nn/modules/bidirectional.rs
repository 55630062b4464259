//! # Bidirectional Recurrent Layer
//!
//! Concatenates a runner over the sequence as given with a runner over its
//! length-aware time reversal.

use ndarray::{Array3, ArrayD};
use std::collections::BTreeMap;

use super::rnn::Rnn;
use super::rnn_cell::RnnCell;
use crate::nn::config::InitialStatePolicy;
use crate::nn::Layer;
use crate::tensor::ops::{concat_features, reverse_sequence, reverse_temporal, split_features};
use crate::tensor::{MaskedSequence, Tensor, TensorData, TensorError};

/// Concatenating bidirectional RNN. Output width is `2 * units`: the
/// forward-time states followed by the reverse-time states, re-aligned to
/// the original time positions.
#[derive(Debug, Clone)]
pub struct BidirectionalRnn {
    name: String,
    forward_rnn: Rnn,
    backward_rnn: Rnn,
}

impl BidirectionalRnn {
    /// Creates the two inner runners.
    ///
    /// # Arguments
    /// * `cell`: Template cell. The forward runner shares its weights; the
    ///   backward runner gets an independent deep copy.
    /// * `forward_state`: Default initial state of the forward runner.
    /// * `backward_state`: Default initial state of the backward runner.
    /// * `name`: Registry name of the layer.
    pub fn new(
        cell: &RnnCell,
        forward_state: Option<ArrayD<TensorData>>,
        backward_state: Option<ArrayD<TensorData>>,
        name: &str,
    ) -> Result<Self, TensorError> {
        Ok(BidirectionalRnn {
            name: name.to_string(),
            forward_rnn: Rnn::new(cell, forward_state, "forward_rnn")?,
            backward_rnn: Rnn::new(&cell.deep_clone(), backward_state, "backward_rnn")?,
        })
    }

    pub fn with_initial_state_policy(mut self, policy: InitialStatePolicy) -> Self {
        self.forward_rnn = self.forward_rnn.with_initial_state_policy(policy);
        self.backward_rnn = self.backward_rnn.with_initial_state_policy(policy);
        self
    }

    pub fn forward_rnn(&self) -> &Rnn {
        &self.forward_rnn
    }

    pub fn backward_rnn(&self) -> &Rnn {
        &self.backward_rnn
    }

    /// Units per direction; the output has twice as many features.
    pub fn units(&self) -> usize {
        self.forward_rnn.units()
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.forward_rnn.set_trainable(trainable);
        self.backward_rnn.set_trainable(trainable);
    }
}

impl Layer for BidirectionalRnn {
    type Input = MaskedSequence;
    type Output = MaskedSequence;
    type OutputGrad = Array3<TensorData>;
    type InputGrad = Array3<TensorData>;

    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &MaskedSequence) -> Result<MaskedSequence, TensorError> {
        log::debug!("{}: forward over lengths {:?}", self.name, input.lengths());
        let lengths = input.lengths();
        let forward_out = self.forward_rnn.forward(input)?;
        let backward_out = self.backward_rnn.forward(&reverse_sequence(input)?)?;
        let backward_out = reverse_temporal(backward_out.values().view(), &lengths)?;

        let values = concat_features(forward_out.values().view(), backward_out.view())?;
        Ok(MaskedSequence::from_parts(values, input.mask().clone()))
    }

    fn backward(&self, out_grad: &Array3<TensorData>, input: &MaskedSequence) -> Result<Array3<TensorData>, TensorError> {
        let units = self.units();
        if out_grad.dim().2 != 2 * units {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.batch_size(), input.time_steps(), 2 * units],
                got: out_grad.shape().to_vec(),
            });
        }
        log::debug!("{}: backward over lengths {:?}", self.name, input.lengths());
        let lengths = input.lengths();
        let (forward_grad, backward_grad) = split_features(out_grad.view(), units)?;

        let forward_in_grad = self.forward_rnn.backward(&forward_grad.to_owned(), input)?;
        let backward_in_grad = self.backward_rnn.backward(
            &reverse_temporal(backward_grad, &lengths)?,
            &reverse_sequence(input)?,
        )?;
        Ok(forward_in_grad + reverse_temporal(backward_in_grad.view(), &lengths)?)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        for (direction, rnn) in [("forward", &self.forward_rnn), ("backward", &self.backward_rnn)] {
            for (role, tensor) in rnn.parameters() {
                params.insert(format!("{}_{}", direction, role), tensor);
            }
        }
        params
    }

    fn is_trainable(&self) -> bool {
        self.forward_rnn.is_trainable() && self.backward_rnn.is_trainable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Initializer;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn brnn() -> BidirectionalRnn {
        let mut rng = StdRng::seed_from_u64(21);
        let cell = RnnCell::with_rng(2, 3, "rnn_cell", &Initializer::gaussian(0.0, 0.4), &mut rng).unwrap();
        BidirectionalRnn::new(&cell, None, None, "brnn").unwrap()
    }

    #[test]
    fn directions_never_alias() {
        let brnn = brnn();
        assert!(!brnn.forward_rnn().cell().shares_weights_with(brnn.backward_rnn().cell()));
        brnn.forward_rnn().cell().bias().data_mut().fill(1.0);
        assert!(brnn.backward_rnn().cell().bias().data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn registry_roles_are_namespaced_by_direction() {
        let snapshot = brnn().params("2").unwrap();
        let keys: Vec<_> = snapshot.weights.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                "2:brnn/backward_bias",
                "2:brnn/backward_kernel",
                "2:brnn/backward_recurrent_kernel",
                "2:brnn/forward_bias",
                "2:brnn/forward_kernel",
                "2:brnn/forward_recurrent_kernel",
            ]
        );
    }

    #[test]
    fn update_targets_one_direction() {
        let brnn = brnn();
        let mut weights = crate::nn::ParamMap::new();
        weights.insert("2:brnn/backward_kernel".to_string(), ArrayD::ones(vec![2, 3]));
        brnn.update(&weights).unwrap();
        assert!(brnn.backward_rnn().cell().kernel().data().iter().all(|&v| v == 1.0));
        assert!(brnn.forward_rnn().cell().kernel().data().iter().any(|&v| v != 1.0));
    }

    #[test]
    fn output_width_is_twice_the_units() {
        let brnn = brnn();
        let seq = MaskedSequence::new(Array3::ones((2, 4, 2)), array![[true, true, true, true], [true, true, false, false]]).unwrap();
        let out = brnn.forward(&seq).unwrap();
        assert_eq!(out.values().dim(), (2, 4, 6));
        assert_eq!(out.mask(), seq.mask());
    }

    #[test]
    fn rejects_gradient_of_wrong_width() {
        let brnn = brnn();
        let seq = MaskedSequence::valid(Array3::ones((1, 2, 2)));
        assert!(brnn.backward(&Array3::zeros((1, 2, 3)), &seq).is_err());
    }
}
