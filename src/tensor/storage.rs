//! # Tensor Storage
//!
//! Defines the underlying memory storage for parameter tensors.
//! Currently, this uses `ndarray::ArrayD` for CPU storage.

use ndarray::{ArrayD, IxDyn};
use std::sync::{Arc, RwLock};

use super::TensorData;

/// Represents the CPU memory backing a Tensor.
///
/// It wraps the actual `ndarray` array within synchronization primitives
/// (`Arc<RwLock<...>>`) so several handles can share and modify the same
/// buffer. Cloning a `CpuStorage` aliases the buffer; use [`CpuStorage::deep_clone`]
/// for an independent copy.
#[derive(Debug, Clone)]
pub struct CpuStorage {
    pub(crate) data: Arc<RwLock<ArrayD<TensorData>>>,
}

impl CpuStorage {
    /// Creates a new `CpuStorage` instance from an existing `ndarray::ArrayD`.
    pub fn new(array_data: ArrayD<TensorData>) -> Self {
        CpuStorage {
            data: Arc::new(RwLock::new(array_data)),
        }
    }

    /// Creates a new `CpuStorage` instance initialized with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    /// Provides read access to the underlying `ndarray`.
    /// Locks the `RwLock` for reading. Panics if the lock is poisoned.
    pub fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.data.read().expect("CPU Storage RwLock poisoned (read)")
    }

    /// Provides write access to the underlying `ndarray`.
    /// Locks the `RwLock` for writing. Panics if the lock is poisoned.
    pub fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, ArrayD<TensorData>> {
        self.data.write().expect("CPU Storage RwLock poisoned (write)")
    }

    /// Copies the stored array into a new, unshared storage.
    pub fn deep_clone(&self) -> Self {
        Self::new(self.read_lock().clone())
    }

    /// Whether both storages point at the same buffer.
    pub fn ptr_eq(&self, other: &CpuStorage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
