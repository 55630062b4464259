//! # Recurrent Layer Modules
//!
//! [`Rnn`] unrolls an [`RnnCell`] over the time axis of a padded batch and
//! backpropagates through time.

use ndarray::{s, Array2, Array3, ArrayD, Axis, Ix1, Ix2};
use std::collections::BTreeMap;

use super::rnn_cell::RnnCell;
use crate::nn::config::InitialStatePolicy;
use crate::nn::Layer;
use crate::tensor::{MaskedSequence, MaskedStep, Tensor, TensorData, TensorError};

/// Applies an Elman RNN to a `(batch, time, features)` sequence, returning
/// the hidden state at every step, `(batch, time, units)`.
///
/// The runner holds an alias of the cell it was built from: weights and
/// gradient buffers are the same storage, so an update through either is
/// visible to both, and `backward` accumulates into the cell's gradients.
#[derive(Debug, Clone)]
pub struct Rnn {
    name: String,
    cell: RnnCell,
    // Either (units) or (rows, units); validated at construction.
    initial_state: Option<ArrayD<TensorData>>,
    policy: InitialStatePolicy,
}

impl Rnn {
    /// Creates a new Rnn module.
    ///
    /// # Arguments
    /// * `cell`: The cell to unroll. Its weights are shared, not copied.
    /// * `initial_state`: Default initial state, shaped `(units)` or `(rows, units)`.
    ///   `None` starts from zeros.
    /// * `name`: Registry name of the layer.
    pub fn new(cell: &RnnCell, initial_state: Option<ArrayD<TensorData>>, name: &str) -> Result<Self, TensorError> {
        if let Some(state) = &initial_state {
            let units = cell.units();
            let valid = match state.shape() {
                [n] => *n == units,
                [_, n] => *n == units,
                _ => false,
            };
            if !valid {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![units],
                    got: state.shape().to_vec(),
                });
            }
        }
        Ok(Rnn {
            name: name.to_string(),
            cell: cell.clone(),
            initial_state,
            policy: InitialStatePolicy::default(),
        })
    }

    pub fn with_initial_state_policy(mut self, policy: InitialStatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cell(&self) -> &RnnCell {
        &self.cell
    }

    pub fn units(&self) -> usize {
        self.cell.units()
    }

    pub fn in_features(&self) -> usize {
        self.cell.in_features()
    }

    /// Freezes or unfreezes the runner's cell handle.
    pub fn set_trainable(&mut self, trainable: bool) {
        self.cell.set_trainable(trainable);
    }

    /// Resolves the initial state for a batch of `batch` rows.
    pub fn initial_state(&self, batch: usize) -> Result<Array2<TensorData>, TensorError> {
        let units = self.units();
        let Some(state) = &self.initial_state else {
            return Ok(Array2::zeros((batch, units)));
        };
        if state.ndim() == 1 {
            let row = state.view().into_dimensionality::<Ix1>()?;
            return Ok(row.broadcast((batch, units)).map(|b| b.to_owned()).ok_or_else(|| {
                TensorError::IncompatibleShapes {
                    op: "broadcast initial state".to_string(),
                    shape1: state.shape().to_vec(),
                    shape2: vec![batch, units],
                }
            })?);
        }

        let rows = state.view().into_dimensionality::<Ix2>()?;
        if rows.nrows() == batch {
            return Ok(rows.to_owned());
        }
        match self.policy {
            InitialStatePolicy::Strict => Err(TensorError::ShapeMismatch {
                expected: vec![batch, units],
                got: rows.shape().to_vec(),
            }),
            InitialStatePolicy::Rebroadcast => {
                log::warn!(
                    "{}: initial state has {} rows for a batch of {}; re-broadcasting its first row",
                    self.name,
                    rows.nrows(),
                    batch
                );
                if rows.nrows() == 0 {
                    return Err(TensorError::ShapeMismatch {
                        expected: vec![batch, units],
                        got: rows.shape().to_vec(),
                    });
                }
                let first = rows.row(0);
                Ok(Array2::from_shape_fn((batch, units), |(_, u)| first[u]))
            }
        }
    }

    fn check_input(&self, input: &MaskedSequence) -> Result<(), TensorError> {
        if input.features() != self.in_features() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.batch_size(), input.time_steps(), self.in_features()],
                got: input.values().shape().to_vec(),
            });
        }
        Ok(())
    }

    /// Runs the cell over every step, returning the initial state used and
    /// the hidden state at each step.
    fn unroll(&self, input: &MaskedSequence) -> Result<(MaskedStep, MaskedSequence), TensorError> {
        self.check_input(input)?;
        let (batch, time) = (input.batch_size(), input.time_steps());
        let h0 = MaskedStep::valid(self.initial_state(batch)?);

        let mut values = Array3::zeros((batch, time, self.units()));
        let mut mask = Array2::from_elem((batch, time), true);
        let mut state = h0.clone();
        for t in 0..time {
            // Padded rows of the previous output are fed back as they are;
            // the cell's masking keeps them padded.
            state = self.cell.forward_step(&input.step(t), &state)?;
            values.index_axis_mut(Axis(1), t).assign(state.values());
            mask.column_mut(t).assign(state.mask());
            log::trace!("{}: step {} done", self.name, t);
        }
        Ok((h0, MaskedSequence::from_parts(values, mask)))
    }

    /// The last valid hidden state of each row, `(batch, units)`. Rows with
    /// no valid step keep their initial state.
    pub fn final_state(&self, input: &MaskedSequence) -> Result<Array2<TensorData>, TensorError> {
        let (h0, states) = self.unroll(input)?;
        let mut last = h0.values().clone();
        for (b, &len) in input.lengths().iter().enumerate() {
            if len > 0 {
                last.row_mut(b).assign(&states.values().slice(s![b, len - 1, ..]));
            }
        }
        Ok(last)
    }
}

impl Layer for Rnn {
    type Input = MaskedSequence;
    type Output = MaskedSequence;
    type OutputGrad = Array3<TensorData>;
    type InputGrad = Array3<TensorData>;

    fn name(&self) -> &str {
        &self.name
    }

    /// Output has the input's padding pattern.
    fn forward(&self, input: &MaskedSequence) -> Result<MaskedSequence, TensorError> {
        log::debug!(
            "{}: forward over batch {} x time {}",
            self.name,
            input.batch_size(),
            input.time_steps()
        );
        let (_, outputs) = self.unroll(input)?;
        Ok(outputs)
    }

    /// Backpropagation through time.
    ///
    /// Walks `t = T-1..0`; the state gradient returned at step `t` is added
    /// to the output gradient of step `t-1` before that step is processed.
    /// Weight gradients of the shared cell accumulate over every step.
    fn backward(&self, out_grad: &Array3<TensorData>, input: &MaskedSequence) -> Result<Array3<TensorData>, TensorError> {
        let (h0, states) = self.unroll(input)?;
        let (batch, time, features) = input.values().dim();
        if out_grad.dim() != (batch, time, self.units()) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, time, self.units()],
                got: out_grad.shape().to_vec(),
            });
        }
        log::debug!("{}: backward over batch {} x time {}", self.name, batch, time);

        let mut carry = out_grad.clone();
        let mut in_grad = Array3::zeros((batch, time, features));
        for t in (0..time).rev() {
            let prev = if t == 0 { h0.clone() } else { states.step(t - 1) };
            let step_grad = carry.index_axis(Axis(1), t).to_owned();
            let grads = self.cell.backward_step(&step_grad, &input.step(t), &prev)?;
            in_grad.index_axis_mut(Axis(1), t).assign(&grads.input);
            if t > 0 {
                let mut earlier = carry.index_axis_mut(Axis(1), t - 1);
                earlier += &grads.state;
            }
        }
        Ok(in_grad)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.cell.parameters()
    }

    fn is_trainable(&self) -> bool {
        self.cell.is_trainable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Initializer;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cell(seed: u64) -> RnnCell {
        let mut rng = StdRng::seed_from_u64(seed);
        RnnCell::with_rng(2, 3, "rnn_cell", &Initializer::gaussian(0.0, 0.4), &mut rng).unwrap()
    }

    #[test]
    fn shares_weights_with_its_cell() {
        let cell = cell(1);
        let rnn = Rnn::new(&cell, None, "rnn").unwrap();
        assert!(rnn.cell().shares_weights_with(&cell));

        cell.kernel().data_mut().fill(0.25);
        assert!(rnn.cell().kernel().data().iter().all(|&v| v == 0.25));
    }

    #[test]
    fn initial_state_is_broadcast() {
        let rnn = Rnn::new(&cell(2), Some(array![1.0, 2.0, 3.0].into_dyn()), "rnn").unwrap();
        assert_eq!(rnn.initial_state(2).unwrap(), array![[1.0, 2.0, 3.0], [1.0, 2.0, 3.0]]);
    }

    #[test]
    fn mismatched_initial_state_follows_policy() {
        let h0 = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        let rnn = Rnn::new(&cell(3), Some(h0), "rnn").unwrap();
        assert_eq!(
            rnn.initial_state(3).unwrap(),
            array![[1.0, 2.0, 3.0], [1.0, 2.0, 3.0], [1.0, 2.0, 3.0]]
        );
        assert_eq!(rnn.initial_state(2).unwrap()[[1, 0]], 4.0);

        let strict = rnn.with_initial_state_policy(InitialStatePolicy::Strict);
        assert!(matches!(strict.initial_state(3), Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn wrong_unit_count_is_rejected_at_construction() {
        assert!(Rnn::new(&cell(4), Some(ArrayD::zeros(vec![4])), "rnn").is_err());
        assert!(Rnn::new(&cell(4), Some(ArrayD::zeros(vec![1, 1, 3])), "rnn").is_err());
    }

    #[test]
    fn final_state_picks_last_valid_step() {
        let rnn = Rnn::new(&cell(5), None, "rnn").unwrap();
        let values = Array3::from_shape_fn((2, 3, 2), |(b, t, f)| 0.1 * (b + t + f) as TensorData);
        let seq = MaskedSequence::new(values, array![[true, true, true], [true, false, false]]).unwrap();
        let outputs = rnn.forward(&seq).unwrap();
        let last = rnn.final_state(&seq).unwrap();
        assert_eq!(last.row(0), outputs.values().slice(s![0, 2, ..]));
        assert_eq!(last.row(1), outputs.values().slice(s![1, 0, ..]));
    }

    #[test]
    fn feature_mismatch_is_fatal() {
        let rnn = Rnn::new(&cell(6), None, "rnn").unwrap();
        let seq = MaskedSequence::valid(Array3::zeros((1, 2, 5)));
        assert!(rnn.forward(&seq).is_err());
        let ok = MaskedSequence::valid(Array3::zeros((1, 2, 2)));
        assert!(rnn.backward(&Array3::zeros((1, 2, 4)), &ok).is_err());
    }
}
