//! # Weight Initialization (`nn::init`)
//!
//! Distributions used to draw initial weight tensors.

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::tensor::{TensorData, TensorError};

fn default_std() -> TensorData {
    0.1
}

fn default_low() -> TensorData {
    -0.05
}

fn default_high() -> TensorData {
    0.05
}

/// A weight distribution.
///
/// Deserializes from a `kind`-tagged map, e.g.
/// `{"kind": "xavier", "fan_in": 4, "fan_out": 5}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    /// Normal(mean, std).
    Gaussian {
        #[serde(default)]
        mean: TensorData,
        #[serde(default = "default_std")]
        std: TensorData,
    },
    /// Uniform over `[low, high)`.
    Uniform {
        #[serde(default = "default_low")]
        low: TensorData,
        #[serde(default = "default_high")]
        high: TensorData,
    },
    /// Normal(0, sqrt(2 / (fan_in + fan_out))).
    Xavier { fan_in: usize, fan_out: usize },
    /// Normal(0, sqrt(2 / fan_in)).
    Msra { fan_in: usize },
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::Gaussian {
            mean: 0.0,
            std: default_std(),
        }
    }
}

impl Initializer {
    pub fn gaussian(mean: TensorData, std: TensorData) -> Self {
        Initializer::Gaussian { mean, std }
    }

    pub fn uniform(low: TensorData, high: TensorData) -> Self {
        Initializer::Uniform { low, high }
    }

    pub fn xavier(fan_in: usize, fan_out: usize) -> Self {
        Initializer::Xavier { fan_in, fan_out }
    }

    pub fn msra(fan_in: usize) -> Self {
        Initializer::Msra { fan_in }
    }

    /// Draws an array of `shape` using the thread-local RNG.
    pub fn initialize(&self, shape: &[usize]) -> Result<ArrayD<TensorData>, TensorError> {
        self.initialize_with(shape, &mut rand::thread_rng())
    }

    /// Draws an array of `shape` from a caller-supplied RNG, for
    /// reproducible weights.
    pub fn initialize_with<R>(&self, shape: &[usize], rng: &mut R) -> Result<ArrayD<TensorData>, TensorError>
    where
        R: Rng + ?Sized,
    {
        let shape = IxDyn(shape);
        match *self {
            Initializer::Gaussian { mean, std } => normal(shape, mean, std, rng),
            Initializer::Uniform { low, high } => {
                if !(low < high) {
                    return Err(TensorError::InvalidInitializer(format!(
                        "uniform bounds must satisfy low < high, got [{low}, {high})"
                    )));
                }
                Ok(ArrayD::random_using(shape, Uniform::new(low, high), rng))
            }
            Initializer::Xavier { fan_in, fan_out } => {
                if fan_in + fan_out == 0 {
                    return Err(TensorError::InvalidInitializer(
                        "xavier requires fan_in + fan_out > 0".to_string(),
                    ));
                }
                let std = (2.0 / (fan_in + fan_out) as TensorData).sqrt();
                normal(shape, 0.0, std, rng)
            }
            Initializer::Msra { fan_in } => {
                if fan_in == 0 {
                    return Err(TensorError::InvalidInitializer(
                        "msra requires fan_in > 0".to_string(),
                    ));
                }
                let std = (2.0 / fan_in as TensorData).sqrt();
                normal(shape, 0.0, std, rng)
            }
        }
    }
}

fn normal<R>(shape: IxDyn, mean: TensorData, std: TensorData, rng: &mut R) -> Result<ArrayD<TensorData>, TensorError>
where
    R: Rng + ?Sized,
{
    if !(std >= 0.0) {
        return Err(TensorError::InvalidInitializer(format!(
            "standard deviation must be non-negative, got {std}"
        )));
    }
    let dist = Normal::new(mean, std).map_err(|e| TensorError::InvalidInitializer(e.to_string()))?;
    Ok(ArrayD::random_using(shape, dist, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mean_and_std(a: &ArrayD<TensorData>) -> (TensorData, TensorData) {
        let n = a.len() as TensorData;
        let mean = a.sum() / n;
        let var = a.mapv(|v| (v - mean).powi(2)).sum() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn gaussian_matches_requested_moments() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = Initializer::gaussian(1.0, 0.5)
            .initialize_with(&[200, 100], &mut rng)
            .unwrap();
        let (mean, std) = mean_and_std(&a);
        assert!((mean - 1.0).abs() < 0.02, "mean {mean}");
        assert!((std - 0.5).abs() < 0.02, "std {std}");
    }

    #[test]
    fn uniform_stays_in_bounds() {
        let a = Initializer::uniform(-0.05, 0.05).initialize(&[50, 50]).unwrap();
        assert!(a.iter().all(|&v| (-0.05..0.05).contains(&v)));
    }

    #[test]
    fn xavier_and_msra_scale_with_fan() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = Initializer::xavier(30, 70).initialize_with(&[300, 100], &mut rng).unwrap();
        let (_, std) = mean_and_std(&x);
        assert!((std - (2.0f64 / 100.0).sqrt()).abs() < 0.01);

        let m = Initializer::msra(8).initialize_with(&[300, 100], &mut rng).unwrap();
        let (_, std) = mean_and_std(&m);
        assert!((std - 0.5).abs() < 0.02);
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let init = Initializer::default();
        let a = init.initialize_with(&[3, 4], &mut StdRng::seed_from_u64(3)).unwrap();
        let b = init.initialize_with(&[3, 4], &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_parameters_are_reported() {
        assert!(Initializer::uniform(1.0, 1.0).initialize(&[2]).is_err());
        assert!(Initializer::gaussian(0.0, -1.0).initialize(&[2]).is_err());
        assert!(Initializer::msra(0).initialize(&[2]).is_err());
    }

    #[test]
    fn negative_std_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(matches!(
            Initializer::gaussian(0.0, -1.0).initialize_with(&[4], &mut rng),
            Err(TensorError::InvalidInitializer(_))
        ));
        assert!(Initializer::gaussian(0.0, TensorData::NAN).initialize(&[4]).is_err());
        assert!(Initializer::gaussian(0.5, 0.0).initialize(&[3]).unwrap().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn deserializes_tagged_config() {
        let init: Initializer = serde_json::from_str(r#"{"kind": "xavier", "fan_in": 4, "fan_out": 5}"#).unwrap();
        assert_eq!(init, Initializer::xavier(4, 5));

        let init: Initializer = serde_json::from_str(r#"{"kind": "gaussian"}"#).unwrap();
        assert_eq!(init, Initializer::default());
    }
}
