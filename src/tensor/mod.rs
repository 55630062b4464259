//! # Tensor Module
//!
//! This module defines the `Tensor` parameter handle and related
//! functionalities: shared storage, masked (padded) batch containers and
//! the array operations the recurrent layers are built from.

use ndarray::{ArrayD, ArrayViewD, IxDyn};

// --- Submodules ---
pub mod masked;
pub mod ops;
pub mod storage;

// --- Re-exports ---
pub use masked::{MaskedSequence, MaskedStep, SENTINEL};
pub use storage::CpuStorage;

// --- Error Handling ---
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Incompatible shapes for operation {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },
    #[error("Partially padded step at batch {batch}, time {time}: a step must be fully valid or fully padded")]
    PartialPadding { batch: usize, time: usize },
    #[error("Padding of batch row {batch} is not a suffix of the sequence")]
    NonSuffixPadding { batch: usize },
    #[error("Invalid initializer: {0}")]
    InvalidInitializer(String),
    #[error("ndarray error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error("Generic error: {0}")]
    Generic(String),
}

// f64 keeps finite-difference checks meaningful down to ~1e-7 relative error.
pub type TensorData = f64;

/// # Tensor
///
/// A trainable parameter: a value buffer plus a gradient accumulator of
/// the same shape, both behind shared storage.
///
/// `Clone` produces an *alias*: every clone reads and writes the same
/// value and gradient buffers, which is how a sequence runner shares the
/// weights of the cell it was built from. [`Tensor::deep_clone`] produces a
/// structurally independent copy.
#[derive(Clone, Debug)]
pub struct Tensor {
    data: CpuStorage,
    grad: CpuStorage,
    // The shape never changes after construction; `assign` enforces it.
    shape: Vec<usize>,
}

impl Tensor {
    /// Creates a new Tensor from an ndarray::ArrayD with a zeroed gradient.
    pub fn new(data: ArrayD<TensorData>) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            grad: CpuStorage::zeros(&shape),
            data: CpuStorage::new(data),
            shape,
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Provides read-only access to the underlying data.
    /// Note: This locks the RwLock for reading.
    pub fn data(&self) -> std::sync::RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.data.read_lock()
    }

    /// Provides mutable access to the underlying data.
    /// Every alias of this tensor observes the write.
    pub fn data_mut(&self) -> std::sync::RwLockWriteGuard<'_, ArrayD<TensorData>> {
        self.data.write_lock()
    }

    /// Clones the underlying data into a new ArrayD.
    pub fn data_clone(&self) -> ArrayD<TensorData> {
        self.data().clone()
    }

    /// Provides read-only access to the accumulated gradient.
    pub fn grad(&self) -> std::sync::RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.grad.read_lock()
    }

    /// Clones the accumulated gradient into a new ArrayD.
    pub fn grad_clone(&self) -> ArrayD<TensorData> {
        self.grad().clone()
    }

    /// Overwrites the value in place, keeping every alias in sync.
    pub fn assign(&self, value: ArrayViewD<'_, TensorData>) -> Result<(), TensorError> {
        if value.shape() != self.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: value.shape().to_vec(),
            });
        }
        self.data_mut().assign(&value);
        Ok(())
    }

    /// Adds `incoming` onto the gradient buffer. Never overwrites.
    pub fn accumulate_grad(&self, incoming: ArrayViewD<'_, TensorData>) -> Result<(), TensorError> {
        if incoming.shape() != self.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: incoming.shape().to_vec(),
            });
        }
        let mut grad = self.grad.write_lock();
        *grad += &incoming;
        Ok(())
    }

    /// Zeroes the gradient buffer.
    pub fn zero_grad(&self) {
        self.grad.write_lock().fill(0.0);
    }

    /// Copies value and gradient into fresh storage that shares nothing
    /// with `self`.
    pub fn deep_clone(&self) -> Self {
        Tensor {
            data: self.data.deep_clone(),
            grad: self.grad.deep_clone(),
            shape: self.shape.clone(),
        }
    }

    /// Whether `self` and `other` are aliases of the same parameter.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        self.data.ptr_eq(&other.data)
    }
}

// --- Helper functions ---

/// Helper to create a tensor filled with zeros.
pub fn zeros(shape: &[usize]) -> Tensor {
    Tensor::new(ArrayD::zeros(IxDyn(shape)))
}

/// Helper to create a tensor filled with ones.
pub fn ones(shape: &[usize]) -> Tensor {
    Tensor::new(ArrayD::ones(IxDyn(shape)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn clones_alias_and_deep_clones_do_not() {
        let t = zeros(&[2, 3]);
        let alias = t.clone();
        let copy = t.deep_clone();

        alias.data_mut()[[0, 1]] = 4.0;
        assert_eq!(t.data()[[0, 1]], 4.0);
        assert_eq!(copy.data()[[0, 1]], 0.0);
        assert!(t.ptr_eq(&alias));
        assert!(!t.ptr_eq(&copy));
    }

    #[test]
    fn gradients_accumulate_until_zeroed() {
        let t = ones(&[2]);
        let step = array![1.0, -2.0].into_dyn();
        t.accumulate_grad(step.view()).unwrap();
        t.accumulate_grad(step.view()).unwrap();
        assert_eq!(t.grad_clone(), array![2.0, -4.0].into_dyn());

        t.zero_grad();
        assert_eq!(t.grad_clone(), array![0.0, 0.0].into_dyn());
    }

    #[test]
    fn assign_rejects_wrong_shape() {
        let t = zeros(&[2, 2]);
        let bad = ArrayD::<TensorData>::zeros(IxDyn(&[3]));
        assert!(matches!(
            t.assign(bad.view()),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
