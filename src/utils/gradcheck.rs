//! # Gradient Checking
//!
//! Symmetric finite differences for verifying analytic gradients.
//! Parameter perturbation is sequential (it writes through shared weight
//! storage); input perturbation only needs read access to the layer and
//! runs in parallel with `rayon`.

use ndarray::{Array, ArrayBase, ArrayD, Data, Dimension, IxDyn, Zip};
use rayon::prelude::*;

use crate::tensor::{Tensor, TensorData, TensorError};

/// Mean relative error `|x - y| / max(1e-8, |x| + |y|)` over the entries
/// where it is defined (NaN entries are skipped). Returns 0 when no entry
/// is defined.
pub fn rel_error<S1, S2, D>(x: &ArrayBase<S1, D>, y: &ArrayBase<S2, D>) -> TensorData
where
    S1: Data<Elem = TensorData>,
    S2: Data<Elem = TensorData>,
    D: Dimension,
{
    let errors = Zip::from(x)
        .and(y)
        .map_collect(|&a, &b| (a - b).abs() / TensorData::max(1e-8, a.abs() + b.abs()));
    let (sum, count) = errors
        .iter()
        .filter(|e| !e.is_nan())
        .fold((0.0, 0usize), |(sum, count), &e| (sum + e, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as TensorData
    }
}

fn entry(param: &Tensor, index: usize) -> Result<TensorData, TensorError> {
    param
        .data()
        .iter()
        .nth(index)
        .copied()
        .ok_or_else(|| TensorError::Generic(format!("entry {} out of bounds for {:?}", index, param.shape())))
}

fn set_entry(param: &Tensor, index: usize, value: TensorData) -> Result<(), TensorError> {
    let mut data = param.data_mut();
    let slot = data
        .iter_mut()
        .nth(index)
        .ok_or_else(|| TensorError::Generic(format!("entry {} out of bounds", index)))?;
    *slot = value;
    Ok(())
}

/// Evaluates `loss` with entry `index` temporarily set to `value`.
fn loss_at<F>(param: &Tensor, index: usize, value: TensorData, original: TensorData, loss: &mut F) -> Result<TensorData, TensorError>
where
    F: FnMut() -> Result<TensorData, TensorError>,
{
    set_entry(param, index, value)?;
    let result = loss();
    set_entry(param, index, original)?;
    result
}

/// Numerical gradient of `loss` with respect to every entry of `param`.
///
/// Each entry is nudged by `±epsilon` in place, so every layer aliasing
/// `param` sees the perturbation while `loss` runs. The original value is
/// restored afterwards, also when `loss` fails.
pub fn numeric_gradient<F>(param: &Tensor, epsilon: TensorData, mut loss: F) -> Result<ArrayD<TensorData>, TensorError>
where
    F: FnMut() -> Result<TensorData, TensorError>,
{
    let mut grad = Vec::with_capacity(param.size());
    for index in 0..param.size() {
        let original = entry(param, index)?;
        let plus = loss_at(param, index, original + epsilon, original, &mut loss)?;
        let minus = loss_at(param, index, original - epsilon, original, &mut loss)?;
        grad.push((plus - minus) / (2.0 * epsilon));
    }
    Ok(ArrayD::from_shape_vec(IxDyn(param.shape()), grad)?)
}

/// Numerical gradient of `loss` with respect to every entry of `input`.
/// Entries are evaluated in parallel on independent copies of `input`.
pub fn numeric_input_gradient<D, F>(
    input: &Array<TensorData, D>,
    epsilon: TensorData,
    loss: F,
) -> Result<Array<TensorData, D>, TensorError>
where
    D: Dimension,
    F: Fn(&Array<TensorData, D>) -> Result<TensorData, TensorError> + Sync,
{
    let perturbed = |index: usize, delta: TensorData| -> Result<TensorData, TensorError> {
        let mut x = input.clone();
        if let Some(slot) = x.iter_mut().nth(index) {
            *slot += delta;
        }
        loss(&x)
    };
    let grad = (0..input.len())
        .into_par_iter()
        .map(|index| Ok((perturbed(index, epsilon)? - perturbed(index, -epsilon)?) / (2.0 * epsilon)))
        .collect::<Result<Vec<TensorData>, TensorError>>()?;
    Ok(Array::from_shape_vec(input.raw_dim(), grad)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rel_error_ignores_nan_entries() {
        let x = array![1.0, TensorData::NAN, 2.0];
        let y = array![1.0, 5.0, 2.0];
        assert_eq!(rel_error(&x, &y), 0.0);
        assert!((rel_error(&array![1.0], &array![3.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn numeric_gradient_of_a_quadratic() {
        let p = Tensor::new(array![1.0, -2.0, 0.5].into_dyn());
        let grad = numeric_gradient(&p, 1e-5, || Ok(p.data().mapv(|v| v * v).sum())).unwrap();
        assert!(rel_error(&grad, &array![2.0, -4.0, 1.0].into_dyn()) < 1e-8);
        assert_eq!(p.data_clone(), array![1.0, -2.0, 0.5].into_dyn());
    }

    #[test]
    fn numeric_input_gradient_in_parallel() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let grad = numeric_input_gradient(&x, 1e-5, |v| Ok(v.mapv(|a| a.powi(3)).sum())).unwrap();
        let expected = x.mapv(|a| 3.0 * a * a);
        assert!(rel_error(&grad, &expected) < 1e-8);
    }
}
