//! # Gradient Clipping

use crate::nn::functional as F;
use crate::nn::ParamMap;
use crate::tensor::TensorData;

/// Clamps every gradient entry into `[-clip, clip]`, in place.
/// Typically applied to the `grads` half of a [`crate::nn::ParamSnapshot`]
/// before an optimizer step.
pub fn clip_gradients(grads: &mut ParamMap, clip: TensorData) {
    for grad in grads.values_mut() {
        *grad = F::clip(grad, clip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn clips_every_entry() {
        let mut grads = ParamMap::new();
        grads.insert("0:rnn/bias".to_string(), array![-2.0, 0.3, 7.0].into_dyn());
        clip_gradients(&mut grads, 1.0);
        assert_eq!(grads["0:rnn/bias"], array![-1.0, 0.3, 1.0].into_dyn());
    }
}
