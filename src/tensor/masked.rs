//! # Masked Batches
//!
//! Padded batches carry an explicit validity channel next to their values.
//! A row of a [`MaskedStep`] (or a `(batch, time)` entry of a
//! [`MaskedSequence`]) is either fully valid or fully padded; padded
//! entries additionally hold [`SENTINEL`] in every feature so the values
//! themselves stay self-describing. Layers always consult the mask, never
//! the values, to decide what is padding.

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};

use super::{TensorData, TensorError};

/// Marker written into padded positions.
pub const SENTINEL: TensorData = TensorData::NAN;

/// Classifies a feature vector: `Some(true)` valid, `Some(false)` fully
/// padded, `None` partially padded.
fn classify_row(row: ArrayView1<'_, TensorData>) -> Option<bool> {
    let padded = row.iter().filter(|v| v.is_nan()).count();
    match padded {
        0 => Some(true),
        n if n == row.len() => Some(false),
        _ => None,
    }
}

/// One timestep of a batch: `(batch, width)` values plus per-row validity.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedStep {
    values: Array2<TensorData>,
    mask: Array1<bool>,
}

impl MaskedStep {
    /// Builds a step from values and a row mask (`true` = valid).
    /// Masked rows are overwritten with [`SENTINEL`].
    pub fn new(mut values: Array2<TensorData>, mask: Array1<bool>) -> Result<Self, TensorError> {
        if mask.len() != values.nrows() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![values.nrows()],
                got: vec![mask.len()],
            });
        }
        for (mut row, &valid) in values.outer_iter_mut().zip(mask.iter()) {
            if !valid {
                row.fill(SENTINEL);
            }
        }
        Ok(MaskedStep { values, mask })
    }

    /// A step in which every row is valid.
    pub fn valid(values: Array2<TensorData>) -> Self {
        let mask = Array1::from_elem(values.nrows(), true);
        MaskedStep { values, mask }
    }

    /// Derives the mask from sentinel-marked rows. A row with only some
    /// sentinel features is rejected as `PartialPadding` (reported at time 0).
    pub fn from_sentinel(values: Array2<TensorData>) -> Result<Self, TensorError> {
        let mut mask = Array1::from_elem(values.nrows(), true);
        for (b, row) in values.outer_iter().enumerate() {
            mask[b] = classify_row(row).ok_or(TensorError::PartialPadding { batch: b, time: 0 })?;
        }
        Ok(MaskedStep { values, mask })
    }

    pub fn values(&self) -> &Array2<TensorData> {
        &self.values
    }

    pub fn mask(&self) -> &Array1<bool> {
        &self.mask
    }

    pub fn batch_size(&self) -> usize {
        self.values.nrows()
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    /// Values with padded rows replaced by zero, safe to feed into arithmetic.
    pub fn clean_values(&self) -> Array2<TensorData> {
        let mut clean = self.values.clone();
        zero_masked_rows(&mut clean, &self.mask);
        clean
    }
}

/// Zeroes every row of `values` whose mask entry is `false`.
pub(crate) fn zero_masked_rows(values: &mut Array2<TensorData>, mask: &Array1<bool>) {
    for (mut row, &valid) in values.outer_iter_mut().zip(mask.iter()) {
        if !valid {
            row.fill(0.0);
        }
    }
}

/// A padded batch of sequences: `(batch, time, features)` values plus a
/// `(batch, time)` validity mask. Padding is always a suffix of each row.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedSequence {
    values: Array3<TensorData>,
    mask: Array2<bool>,
}

impl MaskedSequence {
    /// Builds a sequence from values and a `(batch, time)` mask.
    /// Rejects masks whose padding is not a per-row suffix.
    pub fn new(mut values: Array3<TensorData>, mask: Array2<bool>) -> Result<Self, TensorError> {
        let (batch, time, _) = values.dim();
        if mask.dim() != (batch, time) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, time],
                got: mask.shape().to_vec(),
            });
        }
        check_suffix_padding(&mask)?;
        for ((b, t), &valid) in mask.indexed_iter() {
            if !valid {
                values.index_axis_mut(Axis(0), b).row_mut(t).fill(SENTINEL);
            }
        }
        Ok(MaskedSequence { values, mask })
    }

    /// A sequence batch without padding.
    pub fn valid(values: Array3<TensorData>) -> Self {
        let (batch, time, _) = values.dim();
        MaskedSequence {
            values,
            mask: Array2::from_elem((batch, time), true),
        }
    }

    /// Derives the mask from sentinel-marked steps: a step is padded iff
    /// every one of its features is [`SENTINEL`].
    pub fn from_sentinel(values: Array3<TensorData>) -> Result<Self, TensorError> {
        let (batch, time, _) = values.dim();
        let mut mask = Array2::from_elem((batch, time), true);
        for (b, row) in values.outer_iter().enumerate() {
            for (t, step) in row.outer_iter().enumerate() {
                mask[[b, t]] = classify_row(step).ok_or(TensorError::PartialPadding { batch: b, time: t })?;
            }
        }
        check_suffix_padding(&mask)?;
        Ok(MaskedSequence { values, mask })
    }

    /// Assembles a sequence whose padded entries already hold the sentinel.
    pub(crate) fn from_parts(values: Array3<TensorData>, mask: Array2<bool>) -> Self {
        MaskedSequence { values, mask }
    }

    pub fn values(&self) -> &Array3<TensorData> {
        &self.values
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn batch_size(&self) -> usize {
        self.values.dim().0
    }

    pub fn time_steps(&self) -> usize {
        self.values.dim().1
    }

    pub fn features(&self) -> usize {
        self.values.dim().2
    }

    /// Number of valid steps in every batch row.
    pub fn lengths(&self) -> Vec<usize> {
        self.mask
            .outer_iter()
            .map(|row| row.iter().filter(|&&valid| valid).count())
            .collect()
    }

    /// The `t`-th timestep across the batch.
    pub fn step(&self, t: usize) -> MaskedStep {
        MaskedStep {
            values: self.values.index_axis(Axis(1), t).to_owned(),
            mask: self.mask.column(t).to_owned(),
        }
    }

    /// Values in sentinel form: every padded step filled with [`SENTINEL`].
    pub fn to_sentinel(&self) -> Array3<TensorData> {
        let mut values = self.values.clone();
        for ((b, t), &valid) in self.mask.indexed_iter() {
            if !valid {
                values.index_axis_mut(Axis(0), b).row_mut(t).fill(SENTINEL);
            }
        }
        values
    }

    /// Values with padded steps replaced by zero.
    pub fn clean_values(&self) -> Array3<TensorData> {
        let mut values = self.values.clone();
        for ((b, t), &valid) in self.mask.indexed_iter() {
            if !valid {
                values.index_axis_mut(Axis(0), b).row_mut(t).fill(0.0);
            }
        }
        values
    }
}

fn check_suffix_padding(mask: &Array2<bool>) -> Result<(), TensorError> {
    for (b, row) in mask.outer_iter().enumerate() {
        let length = row.iter().take_while(|&&valid| valid).count();
        if row.iter().skip(length).any(|&valid| valid) {
            return Err(TensorError::NonSuffixPadding { batch: b });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    fn padded() -> Array3<TensorData> {
        let mut x = Array3::from_shape_fn((2, 3, 2), |(b, t, f)| (b * 6 + t * 2 + f) as TensorData);
        x.index_axis_mut(Axis(0), 0).row_mut(2).fill(SENTINEL);
        x.index_axis_mut(Axis(0), 1).row_mut(1).fill(SENTINEL);
        x.index_axis_mut(Axis(0), 1).row_mut(2).fill(SENTINEL);
        x
    }

    #[test]
    fn sentinel_steps_become_mask_entries() {
        let seq = MaskedSequence::from_sentinel(padded()).unwrap();
        assert_eq!(seq.mask(), &array![[true, true, false], [true, false, false]]);
        assert_eq!(seq.lengths(), vec![2, 1]);

        let step = seq.step(1);
        assert_eq!(step.mask(), &array![true, false]);
        assert!(step.values()[[1, 0]].is_nan());
        assert_eq!(step.clean_values()[[1, 0]], 0.0);
    }

    #[test]
    fn sentinel_rows_of_a_step_become_mask_entries() {
        let step = MaskedStep::from_sentinel(array![[1.0, 2.0], [SENTINEL, SENTINEL]]).unwrap();
        assert_eq!(step.mask(), &array![true, false]);
        assert_eq!(step.clean_values(), array![[1.0, 2.0], [0.0, 0.0]]);

        assert!(matches!(
            MaskedStep::from_sentinel(array![[1.0, SENTINEL]]),
            Err(TensorError::PartialPadding { batch: 0, time: 0 })
        ));
    }

    #[test]
    fn partial_padding_is_rejected() {
        let mut x = padded();
        x[[0, 0, 1]] = SENTINEL;
        assert!(matches!(
            MaskedSequence::from_sentinel(x),
            Err(TensorError::PartialPadding { batch: 0, time: 0 })
        ));
    }

    #[test]
    fn interior_gaps_are_rejected() {
        let values = Array3::zeros((1, 3, 2));
        let mask = array![[true, false, true]];
        assert!(matches!(
            MaskedSequence::new(values, mask),
            Err(TensorError::NonSuffixPadding { batch: 0 })
        ));
    }

    #[test]
    fn explicit_mask_writes_sentinel() {
        let seq = MaskedSequence::new(Array3::ones((1, 2, 3)), array![[true, false]]).unwrap();
        assert!(seq.values().index_axis(Axis(0), 0).row(1).iter().all(|v| v.is_nan()));
        assert_eq!(seq.clean_values()[[0, 1, 2]], 0.0);
        assert_eq!(seq.to_sentinel()[[0, 0, 0]], 1.0);
    }
}
