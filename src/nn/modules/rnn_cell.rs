//! # Recurrent Cell
//!
//! A single Elman step: `h_t = tanh(x_t · W + h_{t-1} · U + b)`, with
//! padded rows masked on the way in and on the way out.

use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;
use std::collections::BTreeMap;

use crate::nn::functional as F;
use crate::nn::init::Initializer;
use crate::nn::Layer;
use crate::tensor::masked::zero_masked_rows;
use crate::tensor::{self, MaskedStep, Tensor, TensorData, TensorError};

/// Gradients returned by [`RnnCell::backward_step`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellGrads {
    /// Gradient with respect to the step input, `(batch, in_features)`.
    pub input: Array2<TensorData>,
    /// Gradient with respect to the previous state, `(batch, units)`.
    pub state: Array2<TensorData>,
}

/// Single-timestep recurrent unit.
///
/// Owns `kernel` `(in_features, units)`, `recurrent_kernel` `(units, units)`
/// and `bias` `(units)` together with their gradient accumulators.
/// `Clone` aliases the weights (a clone reads and accumulates into the
/// same buffers); use [`RnnCell::deep_clone`] for independent weights.
#[derive(Debug, Clone)]
pub struct RnnCell {
    name: String,
    kernel: Tensor,
    recurrent_kernel: Tensor,
    bias: Tensor,
    in_features: usize,
    units: usize,
    trainable: bool,
}

impl RnnCell {
    /// Creates a new cell with kernels drawn from `initializer` and a zero bias.
    ///
    /// # Arguments
    /// * `in_features`: Size of each input step.
    /// * `units`: Number of hidden units.
    /// * `name`: Registry name of the cell.
    /// * `initializer`: Distribution for both kernels.
    pub fn new(in_features: usize, units: usize, name: &str, initializer: &Initializer) -> Result<Self, TensorError> {
        Self::with_rng(in_features, units, name, initializer, &mut rand::thread_rng())
    }

    /// Like [`RnnCell::new`], drawing from a caller-supplied RNG.
    pub fn with_rng<R>(
        in_features: usize,
        units: usize,
        name: &str,
        initializer: &Initializer,
        rng: &mut R,
    ) -> Result<Self, TensorError>
    where
        R: Rng + ?Sized,
    {
        let kernel = initializer.initialize_with(&[in_features, units], rng)?;
        let recurrent_kernel = initializer.initialize_with(&[units, units], rng)?;
        Ok(RnnCell {
            name: name.to_string(),
            kernel: Tensor::new(kernel),
            recurrent_kernel: Tensor::new(recurrent_kernel),
            bias: tensor::zeros(&[units]),
            in_features,
            units,
            trainable: true,
        })
    }

    /// Builds a cell around explicit weights.
    pub fn from_weights(
        name: &str,
        kernel: Array2<TensorData>,
        recurrent_kernel: Array2<TensorData>,
        bias: Array1<TensorData>,
    ) -> Result<Self, TensorError> {
        let (in_features, units) = kernel.dim();
        if recurrent_kernel.dim() != (units, units) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![units, units],
                got: recurrent_kernel.shape().to_vec(),
            });
        }
        if bias.len() != units {
            return Err(TensorError::ShapeMismatch {
                expected: vec![units],
                got: bias.shape().to_vec(),
            });
        }
        Ok(RnnCell {
            name: name.to_string(),
            kernel: Tensor::new(kernel.into_dyn()),
            recurrent_kernel: Tensor::new(recurrent_kernel.into_dyn()),
            bias: Tensor::new(bias.into_dyn()),
            in_features,
            units,
            trainable: true,
        })
    }

    /// A copy with its own weight and gradient storage.
    pub fn deep_clone(&self) -> Self {
        RnnCell {
            name: self.name.clone(),
            kernel: self.kernel.deep_clone(),
            recurrent_kernel: self.recurrent_kernel.deep_clone(),
            bias: self.bias.deep_clone(),
            in_features: self.in_features,
            units: self.units,
            trainable: self.trainable,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn kernel(&self) -> &Tensor {
        &self.kernel
    }

    pub fn recurrent_kernel(&self) -> &Tensor {
        &self.recurrent_kernel
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Whether `other` reads and writes the same weights as `self`.
    pub fn shares_weights_with(&self, other: &RnnCell) -> bool {
        self.kernel.ptr_eq(&other.kernel)
            && self.recurrent_kernel.ptr_eq(&other.recurrent_kernel)
            && self.bias.ptr_eq(&other.bias)
    }

    fn check_step(&self, input: &MaskedStep, state: &MaskedStep) -> Result<(), TensorError> {
        let batch = input.batch_size();
        if input.width() != self.in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, self.in_features],
                got: input.values().shape().to_vec(),
            });
        }
        if state.batch_size() != batch || state.width() != self.units {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, self.units],
                got: state.values().shape().to_vec(),
            });
        }
        Ok(())
    }

    /// `tanh(x · W + h · U + b)` on already-cleaned inputs.
    fn activate(&self, x: &Array2<TensorData>, h: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        let kernel_guard = self.kernel.data();
        let recurrent_guard = self.recurrent_kernel.data();
        let bias_guard = self.bias.data();
        let kernel = kernel_guard.view().into_dimensionality::<Ix2>()?;
        let recurrent_kernel = recurrent_guard.view().into_dimensionality::<Ix2>()?;
        let bias = bias_guard.view().into_dimensionality::<Ix1>()?;

        let pre = x.dot(&kernel) + &h.dot(&recurrent_kernel) + &bias;
        Ok(F::tanh(&pre))
    }

    /// Computes one step's output from one step's input and the previous
    /// state.
    ///
    /// Padded rows of `input` and `state` enter the affine product as
    /// zeros. Output rows are padded exactly where `input` rows are, even
    /// when a valid row's activation happens to be zero.
    pub fn forward_step(&self, input: &MaskedStep, state: &MaskedStep) -> Result<MaskedStep, TensorError> {
        self.check_step(input, state)?;
        let activation = self.activate(&input.clean_values(), &state.clean_values())?;
        MaskedStep::new(activation, input.mask().clone())
    }

    /// Backward pass for one step. Recomputes the forward activation, adds
    /// this step's contribution onto the weight gradients, and returns the
    /// gradients for the input and the previous state (zero on padded rows).
    pub fn backward_step(
        &self,
        out_grad: &Array2<TensorData>,
        input: &MaskedStep,
        state: &MaskedStep,
    ) -> Result<CellGrads, TensorError> {
        self.check_step(input, state)?;
        if out_grad.dim() != (input.batch_size(), self.units) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.batch_size(), self.units],
                got: out_grad.shape().to_vec(),
            });
        }

        let x = input.clean_values();
        let h = state.clean_values();
        let activation = self.activate(&x, &h)?;

        // Output rows are padded where input rows are.
        let mut d_pre = F::tanh_backward(out_grad, &activation);
        zero_masked_rows(&mut d_pre, input.mask());

        self.kernel.accumulate_grad(x.t().dot(&d_pre).into_dyn().view())?;
        self.recurrent_kernel.accumulate_grad(h.t().dot(&d_pre).into_dyn().view())?;
        self.bias.accumulate_grad(d_pre.sum_axis(Axis(0)).into_dyn().view())?;

        let kernel_guard = self.kernel.data();
        let recurrent_guard = self.recurrent_kernel.data();
        let kernel = kernel_guard.view().into_dimensionality::<Ix2>()?;
        let recurrent_kernel = recurrent_guard.view().into_dimensionality::<Ix2>()?;

        let mut d_input = d_pre.dot(&kernel.t());
        zero_masked_rows(&mut d_input, input.mask());
        let mut d_state = d_pre.dot(&recurrent_kernel.t());
        zero_masked_rows(&mut d_state, state.mask());

        log::trace!("{}: backward step over {} rows", self.name, input.batch_size());
        Ok(CellGrads {
            input: d_input,
            state: d_state,
        })
    }
}

impl Layer for RnnCell {
    /// `(input step, previous state)`.
    type Input = (MaskedStep, MaskedStep);
    type Output = MaskedStep;
    type OutputGrad = Array2<TensorData>;
    type InputGrad = CellGrads;

    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &Self::Input) -> Result<MaskedStep, TensorError> {
        self.forward_step(&input.0, &input.1)
    }

    fn backward(&self, out_grad: &Array2<TensorData>, input: &Self::Input) -> Result<CellGrads, TensorError> {
        self.backward_step(out_grad, &input.0, &input.1)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        params.insert("kernel".to_string(), self.kernel.clone());
        params.insert("recurrent_kernel".to_string(), self.recurrent_kernel.clone());
        params.insert("bias".to_string(), self.bias.clone());
        params
    }

    fn is_trainable(&self) -> bool {
        self.trainable
    }
}
