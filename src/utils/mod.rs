//! # Utility Functions (`utils`)
//!
//! Gradient checking and clipping helpers for callers of the layers.

pub mod clip;
pub mod gradcheck;

pub use clip::clip_gradients;
pub use gradcheck::{numeric_gradient, numeric_input_gradient, rel_error};
