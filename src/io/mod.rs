/*
    Lachesis, onboard model-based prognostics
    Copyright (C) 2026 Lachesis Contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::linalg::DMatrix;
use crate::model::Model;
use crate::predict::PredictConfig;
use crate::time::Duration;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use typed_builder::TypedBuilder;

/// Builds validated covariance matrices from flattened configuration lists.
pub mod matrices;

pub use matrices::covar_from_flat;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] io::Error),

    #[error("failed to parse YAML configuration: {0}")]
    ParseError(#[source] serde_yaml::Error),

    #[error("unknown {kind} type: {name}")]
    UnknownType { kind: &'static str, name: String },

    #[error("{what} has {len} values which cannot fill a square matrix")]
    NotSquare { what: &'static str, len: usize },

    #[error("{what} is {dim}x{dim} but the model requires {expected}x{expected}")]
    DimensionMismatch {
        what: &'static str,
        dim: usize,
        expected: usize,
    },

    #[error("{what} must be symmetric positive semi-definite")]
    NotPsd { what: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PartialEq for ConfigError {
    /// No two configuration errors match
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

/// The full configuration surface of one managed unit.
///
/// The four type names are registry lookup keys; everything else tunes the
/// components those keys resolve to. A configuration is data only: nothing is
/// constructed until [Prognoser::enable], which validates every value eagerly
/// against the resolved model.
///
/// [Prognoser::enable]: crate::prognoser::Prognoser::enable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ProgConfig {
    /// Registry name of the physical model.
    pub model: String,
    /// Registry name of the state estimator.
    pub observer: String,
    /// Registry name of the predictor.
    pub predictor: String,
    /// Registry name of the transport.
    pub communicator: String,

    /// Process noise covariance Q, flattened row-major; must be a perfect
    /// square of the model state size.
    #[builder(default)]
    #[serde(default)]
    pub process_noise: Vec<f64>,
    /// Measurement noise covariance R, flattened row-major; must be a perfect
    /// square of the model output size.
    #[builder(default)]
    #[serde(default)]
    pub measurement_noise: Vec<f64>,
    /// Process noise the predictor simulates with, flattened row-major. When
    /// empty, the predictor shares the observer's Q.
    #[builder(default)]
    #[serde(default)]
    pub predictor_process_noise: Vec<f64>,

    /// UKF sigma point spread scaling.
    #[builder(default = 1.0)]
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// UKF secondary scaling parameter; n + kappa must be positive.
    #[builder(default = 0.0)]
    #[serde(default)]
    pub kappa: f64,

    /// Cycle period of the prognoser.
    pub period: Duration,
    /// Predict every K-th non-empty cycle.
    #[builder(default = 1)]
    #[serde(default = "default_predict_interval")]
    pub predict_interval: u32,

    /// Monte Carlo particle count.
    pub sample_count: usize,
    /// Prediction horizon past the prediction epoch.
    pub horizon: Duration,
    /// Prediction simulation step.
    pub step: Duration,
    /// Random seed for reproducible predictions.
    #[builder(default = 0)]
    #[serde(default)]
    pub seed: u64,
}

fn default_alpha() -> f64 {
    1.0
}

fn default_predict_interval() -> u32 {
    1
}

impl ProgConfig {
    /// Loads a configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).map_err(ConfigError::ParseError)
    }

    /// The process noise covariance, validated against the model state size.
    pub fn process_noise_matrix(&self, model: &dyn Model) -> Result<DMatrix<f64>, ConfigError> {
        covar_from_flat(&self.process_noise, model.state_size(), "process noise Q")
    }

    /// The measurement noise covariance, validated against the model output
    /// size.
    pub fn measurement_noise_matrix(&self, model: &dyn Model) -> Result<DMatrix<f64>, ConfigError> {
        covar_from_flat(
            &self.measurement_noise,
            model.output_size(),
            "measurement noise R",
        )
    }

    /// The process noise the predictor simulates with: its own matrix when
    /// configured, the observer's Q otherwise.
    pub fn predictor_noise_matrix(&self, model: &dyn Model) -> Result<DMatrix<f64>, ConfigError> {
        if self.predictor_process_noise.is_empty() {
            return self.process_noise_matrix(model);
        }
        covar_from_flat(
            &self.predictor_process_noise,
            model.state_size(),
            "predictor process noise",
        )
    }

    /// The predictor tuning section.
    pub fn predict_config(&self) -> PredictConfig {
        PredictConfig {
            sample_count: self.sample_count,
            horizon: self.horizon,
            step: self.step,
            seed: self.seed,
        }
    }

    /// Eagerly validates every value against the resolved model, so that
    /// `enable` either wires a fully valid unit or nothing at all.
    pub fn validate(&self, model: &dyn Model) -> Result<(), ConfigError> {
        if self.period <= Duration::ZERO {
            return Err(ConfigError::InvalidConfig(format!(
                "cycle period must be positive, got {}",
                self.period
            )));
        }
        if self.predict_interval == 0 {
            return Err(ConfigError::InvalidConfig(
                "predict interval must be at least 1".to_string(),
            ));
        }
        self.process_noise_matrix(model)?;
        self.measurement_noise_matrix(model)?;
        self.predictor_noise_matrix(model)?;
        self.predict_config().validate()?;
        Ok(())
    }
}

#[test]
fn test_yaml_roundtrip() {
    use crate::time::TimeUnits;

    let cfg = ProgConfig::builder()
        .model("battery".to_string())
        .observer("ukf".to_string())
        .predictor("mc".to_string())
        .communicator("playback".to_string())
        .process_noise(vec![0.01])
        .measurement_noise(vec![0.01])
        .period(1.seconds())
        .sample_count(100)
        .horizon(100.seconds())
        .step(1.seconds())
        .seed(42)
        .build();

    let yaml = serde_yaml::to_string(&cfg).unwrap();
    let back: ProgConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, cfg);
    assert_eq!(back.alpha, 1.0);
    assert_eq!(back.predict_interval, 1);
}

#[test]
fn test_no_two_config_errors_match() {
    let a = ConfigError::InvalidConfig("a".to_string());
    let b = ConfigError::InvalidConfig("a".to_string());
    assert_ne!(a, b);
}
