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

use crate::estimate::{EstimateError, StateEstimate};
use crate::io::ConfigError;
use crate::linalg::DVector;
use crate::time::{Duration, Epoch};
use serde_derive::{Deserialize, Serialize};
use snafu::prelude::*;
use typed_builder::TypedBuilder;

mod montecarlo;
mod multivariate;
mod results;

pub use montecarlo::MonteCarloPredictor;
pub use multivariate::MultivariateNormal;
pub use results::Prediction;

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PredictionError {
    #[snafu(display("state distribution cannot be sampled: {source}"))]
    UnsampleableDistribution { source: EstimateError },
    #[snafu(display("state distribution has {got} components, the model requires {expected}"))]
    StateDimension { expected: usize, got: usize },
    #[snafu(display("input profile returned {got} components, the model requires {expected}"))]
    ProfileDimension { expected: usize, got: usize },
}

/// The input (load/usage) the simulated system is assumed to see in the
/// future. Queried once per simulation step, from many particles at once.
pub trait InputProfile: Send + Sync {
    fn input_at(&self, epoch: Epoch) -> DVector<f64>;
}

/// The simplest future input assumption: the load stays at a fixed vector.
pub struct ConstantLoad {
    inputs: DVector<f64>,
}

impl ConstantLoad {
    pub fn new(inputs: DVector<f64>) -> Self {
        Self { inputs }
    }
}

impl InputProfile for ConstantLoad {
    fn input_at(&self, _epoch: Epoch) -> DVector<f64> {
        self.inputs.clone()
    }
}

/// A stochastic predictor: projects a state distribution forward in time and
/// returns a distribution over the epoch at which a monitored threshold event
/// first fires.
pub trait Predictor: Send {
    /// Predicts from `epoch` and the provided state distribution, under the
    /// assumed future input profile. The returned distribution is owned by
    /// the caller and never mutated afterwards.
    fn predict(
        &self,
        epoch: Epoch,
        estimate: &StateEstimate,
        profile: &dyn InputProfile,
    ) -> Result<Prediction, PredictionError>;
}

/// Tuning of a stochastic prediction, fixed at predictor construction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct PredictConfig {
    /// Number of particles drawn per predict call.
    pub sample_count: usize,
    /// How far past the prediction epoch a particle may simulate before it is
    /// censored.
    pub horizon: Duration,
    /// Fixed simulation step.
    pub step: Duration,
    /// Seed of the 64bit PCG random number generator; a fixed seed makes two
    /// identically configured runs bit-identical.
    #[builder(default = 0)]
    #[serde(default)]
    pub seed: u64,
}

impl PredictConfig {
    /// Eager validation, so that a predictor is either fully usable or never
    /// built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "sample count must be at least 1".to_string(),
            ));
        }
        if self.step <= Duration::ZERO {
            return Err(ConfigError::InvalidConfig(format!(
                "simulation step must be positive, got {}",
                self.step
            )));
        }
        if self.horizon < self.step {
            return Err(ConfigError::InvalidConfig(format!(
                "horizon {} is shorter than one simulation step {}",
                self.horizon, self.step
            )));
        }
        Ok(())
    }
}
