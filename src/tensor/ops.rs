//! # Tensor Operations
//!
//! Array-level operations on `(batch, time, feature)` data used by the
//! sequence layers: length-aware time reversal and feature-axis
//! concatenation/splitting.

use ndarray::{concatenate, s, Array3, ArrayView3, Axis};

use super::{MaskedSequence, TensorData, TensorError};

/// Reverses the valid prefix of every batch row in time, leaving the
/// trailing padding in place.
///
/// Equivalent to reversing the whole row and then rotating it so the
/// padding (moved to the front by the reversal) returns to the back.
/// Applying it twice with the same lengths is the identity.
pub fn reverse_temporal(
    values: ArrayView3<'_, TensorData>,
    lengths: &[usize],
) -> Result<Array3<TensorData>, TensorError> {
    let (batch, time, _) = values.dim();
    if lengths.len() != batch {
        return Err(TensorError::ShapeMismatch {
            expected: vec![batch],
            got: vec![lengths.len()],
        });
    }
    if let Some(&too_long) = lengths.iter().find(|&&len| len > time) {
        return Err(TensorError::IncompatibleShapes {
            op: "reverse_temporal".to_string(),
            shape1: values.shape().to_vec(),
            shape2: vec![too_long],
        });
    }

    let mut reversed = values.to_owned();
    for (b, &len) in lengths.iter().enumerate() {
        if len > 1 {
            reversed
                .slice_mut(s![b, ..len, ..])
                .assign(&values.slice(s![b, ..len;-1, ..]));
        }
    }
    Ok(reversed)
}

/// Length-aware reversal of a masked sequence. The mask is unchanged since
/// padding stays trailing.
pub fn reverse_sequence(seq: &MaskedSequence) -> Result<MaskedSequence, TensorError> {
    let values = reverse_temporal(seq.values().view(), &seq.lengths())?;
    Ok(MaskedSequence::from_parts(values, seq.mask().clone()))
}

/// Concatenates two `(batch, time, _)` arrays along the feature axis.
pub fn concat_features<'a>(
    a: ArrayView3<'a, TensorData>,
    b: ArrayView3<'a, TensorData>,
) -> Result<Array3<TensorData>, TensorError> {
    if a.dim().0 != b.dim().0 || a.dim().1 != b.dim().1 {
        return Err(TensorError::IncompatibleShapes {
            op: "concat_features".to_string(),
            shape1: a.shape().to_vec(),
            shape2: b.shape().to_vec(),
        });
    }
    Ok(concatenate(Axis(2), &[a, b])?)
}

/// Splits a `(batch, time, features)` array at feature index `at`.
pub fn split_features(
    x: ArrayView3<'_, TensorData>,
    at: usize,
) -> Result<(ArrayView3<'_, TensorData>, ArrayView3<'_, TensorData>), TensorError> {
    if at > x.dim().2 {
        return Err(TensorError::IncompatibleShapes {
            op: "split_features".to_string(),
            shape1: x.shape().to_vec(),
            shape2: vec![at],
        });
    }
    Ok(x.split_at(Axis(2), at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn reverses_only_the_valid_prefix() {
        let x = array![[[1.0], [2.0], [3.0]], [[4.0], [5.0], [6.0]]];
        let r = reverse_temporal(x.view(), &[2, 3]).unwrap();
        assert_eq!(r, array![[[2.0], [1.0], [3.0]], [[6.0], [5.0], [4.0]]]);
    }

    #[test]
    fn double_reversal_is_identity() {
        let x = Array3::from_shape_fn((3, 4, 2), |(b, t, f)| (b * 8 + t * 2 + f) as TensorData);
        let lengths = [4, 1, 0];
        let once = reverse_temporal(x.view(), &lengths).unwrap();
        assert_ne!(once, x);
        assert_eq!(reverse_temporal(once.view(), &lengths).unwrap(), x);
    }

    #[test]
    fn concat_then_split_recovers_halves() {
        let a = Array3::<TensorData>::ones((2, 3, 2));
        let b = Array3::<TensorData>::zeros((2, 3, 4));
        let joined = concat_features(a.view(), b.view()).unwrap();
        assert_eq!(joined.dim(), (2, 3, 6));
        let (left, right) = split_features(joined.view(), 2).unwrap();
        assert_eq!(left, a);
        assert_eq!(right, b);
    }

    #[test]
    fn lengths_must_match_batch() {
        let x = Array3::<TensorData>::zeros((2, 3, 1));
        assert!(reverse_temporal(x.view(), &[3]).is_err());
        assert!(reverse_temporal(x.view(), &[3, 4]).is_err());
    }
}
