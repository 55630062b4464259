//! # Neural Network Functional Interface (`nn::functional`)
//!
//! Stateless element-wise functions used by the recurrent layers,
//! mirroring `torch.nn.functional`. These operate directly on ndarray
//! values; gradients are computed explicitly by the layers.

use ndarray::{Array, ArrayBase, Data, Dimension, Zip};

use crate::tensor::TensorData;

/// Applies the Hyperbolic Tangent (Tanh) function element-wise.
pub fn tanh<S, D>(input: &ArrayBase<S, D>) -> Array<TensorData, D>
where
    S: Data<Elem = TensorData>,
    D: Dimension,
{
    input.mapv(TensorData::tanh)
}

/// Gradient of `tanh` with respect to its pre-activation, given the
/// activation `a = tanh(z)`: `out_grad * (1 - a²)`.
pub fn tanh_backward<S1, S2, D>(
    out_grad: &ArrayBase<S1, D>,
    activation: &ArrayBase<S2, D>,
) -> Array<TensorData, D>
where
    S1: Data<Elem = TensorData>,
    S2: Data<Elem = TensorData>,
    D: Dimension,
{
    Zip::from(out_grad)
        .and(activation)
        .map_collect(|&g, &a| g * (1.0 - a * a))
}

/// Clamps every element into `[-clip, clip]`. A negative bound collapses
/// every element to `clip`; a NaN bound leaves the input unchanged.
pub fn clip<S, D>(input: &ArrayBase<S, D>, clip: TensorData) -> Array<TensorData, D>
where
    S: Data<Elem = TensorData>,
    D: Dimension,
{
    input.mapv(|v| v.max(-clip).min(clip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn tanh_backward_matches_derivative() {
        let z = array![-1.5, 0.0, 0.3];
        let a = tanh(&z);
        let g = tanh_backward(&array![1.0, 2.0, -1.0], &a);
        for i in 0..3 {
            let expected = [1.0, 2.0, -1.0][i] / z[i].cosh().powi(2);
            assert!((g[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn clip_bounds_values() {
        assert_eq!(clip(&array![-3.0, 0.5, 2.0], 1.0), array![-1.0, 0.5, 1.0]);
    }

    #[test]
    fn clip_tolerates_degenerate_bounds() {
        assert_eq!(clip(&array![-3.0, 0.5, 2.0], -1.0), array![-1.0, -1.0, -1.0]);
        assert_eq!(clip(&array![-3.0, 0.5], TensorData::NAN), array![-3.0, 0.5]);
    }
}
