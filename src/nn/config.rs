//! # Layer Configuration
//!
//! Serde-deserializable descriptions of the recurrent layers, so a caller
//! can keep architecture settings in a config file and build layers from
//! them.

use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::init::Initializer;
use super::modules::{BidirectionalRnn, Rnn, RnnCell};
use crate::tensor::{TensorData, TensorError};

fn default_cell_name() -> String {
    "rnn_cell".to_string()
}

fn default_rnn_name() -> String {
    "rnn".to_string()
}

fn default_brnn_name() -> String {
    "brnn".to_string()
}

fn default_trainable() -> bool {
    true
}

/// How a sequence runner treats an initial state whose row count differs
/// from the batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialStatePolicy {
    /// Legacy behavior: re-broadcast the state's first row to every batch
    /// row and log a warning.
    #[default]
    Rebroadcast,
    /// Reject the mismatch with `TensorError::ShapeMismatch`.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnCellConfig {
    pub in_features: usize,
    pub units: usize,
    #[serde(default = "default_cell_name")]
    pub name: String,
    #[serde(default)]
    pub initializer: Initializer,
    #[serde(default = "default_trainable")]
    pub trainable: bool,
}

impl RnnCellConfig {
    pub fn new(in_features: usize, units: usize) -> Self {
        RnnCellConfig {
            in_features,
            units,
            name: default_cell_name(),
            initializer: Initializer::default(),
            trainable: true,
        }
    }

    pub fn build(&self) -> Result<RnnCell, TensorError> {
        self.build_with_rng(&mut rand::thread_rng())
    }

    pub fn build_with_rng<R>(&self, rng: &mut R) -> Result<RnnCell, TensorError>
    where
        R: Rng + ?Sized,
    {
        let mut cell = RnnCell::with_rng(self.in_features, self.units, &self.name, &self.initializer, rng)?;
        cell.set_trainable(self.trainable);
        Ok(cell)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RnnConfig {
    pub cell: RnnCellConfig,
    #[serde(default = "default_rnn_name")]
    pub name: String,
    #[serde(default)]
    pub initial_state_policy: InitialStatePolicy,
}

impl RnnConfig {
    /// Builds the cell and a runner sharing its weights.
    pub fn build(&self, initial_state: Option<ArrayD<TensorData>>) -> Result<Rnn, TensorError> {
        let cell = self.cell.build()?;
        Ok(Rnn::new(&cell, initial_state, &self.name)?.with_initial_state_policy(self.initial_state_policy))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidirectionalRnnConfig {
    pub cell: RnnCellConfig,
    #[serde(default = "default_brnn_name")]
    pub name: String,
    #[serde(default)]
    pub initial_state_policy: InitialStatePolicy,
}

impl BidirectionalRnnConfig {
    pub fn build(
        &self,
        forward_state: Option<ArrayD<TensorData>>,
        backward_state: Option<ArrayD<TensorData>>,
    ) -> Result<BidirectionalRnn, TensorError> {
        let cell = self.cell.build()?;
        Ok(BidirectionalRnn::new(&cell, forward_state, backward_state, &self.name)?
            .with_initial_state_policy(self.initial_state_policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Layer;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RnnConfig = serde_json::from_str(r#"{"cell": {"in_features": 4, "units": 5}}"#).unwrap();
        assert_eq!(config.name, "rnn");
        assert_eq!(config.cell.name, "rnn_cell");
        assert_eq!(config.initial_state_policy, InitialStatePolicy::Rebroadcast);
        assert_eq!(config.cell.initializer, Initializer::default());
        assert!(config.cell.trainable);
    }

    #[test]
    fn builds_layers_from_config() {
        let json = r#"{
            "cell": {"in_features": 3, "units": 2, "initializer": {"kind": "uniform"}, "trainable": false},
            "name": "encoder",
            "initial_state_policy": "strict"
        }"#;
        let config: BidirectionalRnnConfig = serde_json::from_str(json).unwrap();
        let brnn = config.build(None, None).unwrap();
        assert_eq!(brnn.name(), "encoder");
        assert_eq!(brnn.units(), 2);
        assert!(brnn.params("0").is_none());
    }
}
