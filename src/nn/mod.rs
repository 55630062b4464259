//! # Neural Network Module (`nn`)
//!
//! Provides the recurrent layers, their configuration and initialization,
//! and the `Layer` contract through which an external optimizer reads and
//! writes weights.

use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::fmt::Debug;

// --- Submodules ---
pub mod config;
pub mod functional;
pub mod init;
pub mod modules;

// Re-export common items
pub use config::{BidirectionalRnnConfig, InitialStatePolicy, RnnCellConfig, RnnConfig};
pub use init::Initializer;
pub use modules::*;

/// Registry map: `"<prefix>:<layer-name>/<role>"` to an array snapshot.
pub type ParamMap = BTreeMap<String, ArrayD<TensorData>>;

/// Weights and their accumulated gradients, keyed identically.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSnapshot {
    pub weights: ParamMap,
    pub grads: ParamMap,
}

// --- Core Trait: Layer ---

/// Base trait for all layers.
///
/// Every method takes `&self`: weights and gradient accumulators live in
/// shared [`Tensor`] storage, so `backward` accumulates and `update`
/// assigns through interior mutability. Calls on one instance must be
/// sequential.
pub trait Layer: Debug + Send + Sync {
    /// What `forward` consumes (and `backward` re-consumes).
    type Input;
    /// What `forward` produces.
    type Output;
    /// Gradient with respect to `Output`.
    type OutputGrad;
    /// Gradient(s) with respect to `Input`.
    type InputGrad;

    /// Name used as the middle component of registry keys.
    fn name(&self) -> &str;

    /// Performs the forward pass.
    fn forward(&self, input: &Self::Input) -> Result<Self::Output, TensorError>;

    /// Computes input gradients and accumulates weight gradients.
    ///
    /// # Arguments
    /// * `out_grad`: gradient of the loss with respect to the output.
    /// * `input`: the same value passed to the preceding `forward`.
    fn backward(&self, out_grad: &Self::OutputGrad, input: &Self::Input) -> Result<Self::InputGrad, TensorError>;

    /// Handles of the layer's parameters keyed by role
    /// (e.g. `kernel`, `recurrent_kernel`, `bias`).
    /// Uses BTreeMap for deterministic order.
    fn parameters(&self) -> BTreeMap<String, Tensor>;

    /// Frozen layers report no parameters through [`Layer::params`].
    fn is_trainable(&self) -> bool;

    /// Snapshots weights and gradients under `"{prefix}:{name}/{role}"`,
    /// or `None` if the layer is not trainable.
    fn params(&self, prefix: &str) -> Option<ParamSnapshot> {
        if !self.is_trainable() {
            return None;
        }
        let mut weights = ParamMap::new();
        let mut grads = ParamMap::new();
        for (role, tensor) in self.parameters() {
            let key = format!("{}:{}/{}", prefix, self.name(), role);
            weights.insert(key.clone(), tensor.data_clone());
            grads.insert(key, tensor.grad_clone());
        }
        Some(ParamSnapshot { weights, grads })
    }

    /// Assigns new weight values in place.
    ///
    /// A key addresses the first role `r` for which it contains `"/r"`.
    /// Unrecognized keys are ignored; a recognized key with a wrongly
    /// shaped value is an error.
    fn update(&self, weights: &ParamMap) -> Result<(), TensorError> {
        let parameters = self.parameters();
        for (key, value) in weights {
            let target = parameters
                .iter()
                .find(|(role, _)| key.contains(&format!("/{}", role)));
            if let Some((role, tensor)) = target {
                log::trace!("{}: updating {} from key {}", self.name(), role, key);
                tensor.assign(value.view())?;
            }
        }
        Ok(())
    }

    /// Zeros the gradients of all parameters.
    fn zero_grad(&self) {
        for (_role, param) in self.parameters() {
            param.zero_grad();
        }
    }
}
