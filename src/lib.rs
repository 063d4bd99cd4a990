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

/*! # lachesis

Lachesis is an onboard model-based prognostics engine. It estimates the hidden
state of a physical system from noisy sensor streams with recursive Bayesian
filters, and projects that state forward with a Monte Carlo simulation to
predict when a monitored threshold event (e.g. end of discharge) fires, with an
uncertainty distribution.

The engine is built for health management on vehicles, rovers and spacecraft:
every component is resolved by name from a [registry::Registry] built by the
hosting program, and the estimate, predict, publish cycle runs autonomously on
a dedicated thread between `start()` and `stop()`.
*/

/// The contract every physical system model implements: state-space dynamics, output equation and threshold events.
pub mod model;

/// Probabilistic state estimates (mean and covariance) and the records published for them.
pub mod estimate;

/// Recursive state estimators consuming (input, measured output) streams: Unscented and Extended Kalman filters.
pub mod observers;

/// Stochastic predictors sampling future trajectories until a threshold event fires.
pub mod predict;

/// The asynchronous data boundary: samples in, estimates and predictions out.
pub mod comm;

/// Configuration loading and validation, including noise covariance construction.
pub mod io;

/// Maps component type names to constructors, for configuration-driven wiring.
pub mod registry;

/// The orchestrator owning the estimate, predict, publish cycle and its lifecycle.
pub mod prognoser;

/// Matrix hygiene helpers shared by the estimators and predictors.
pub mod utils;

#[macro_use]
extern crate log;
extern crate nalgebra as na;

/// Re-export of hifitime
pub mod time {
    pub use hifitime::*;
}

/// Re-export nalgebra
pub mod linalg {
    pub use na::base::*;
}

/// Re-export some useful things
pub mod prelude {
    pub use crate::comm::{Communicator, LatestValueCell, ProgOutput, Sample};
    pub use crate::estimate::{EstimateRecord, StateEstimate, Uncertainty};
    pub use crate::io::{ConfigError, ProgConfig};
    pub use crate::model::Model;
    pub use crate::observers::{
        ExtendedKalmanFilter, Observer, ObserverError, UnscentedKalmanFilter,
    };
    pub use crate::predict::{
        ConstantLoad, InputProfile, MonteCarloPredictor, PredictConfig, Prediction, Predictor,
    };
    pub use crate::prognoser::{LifecycleState, ProcessError, Prognoser};
    pub use crate::registry::Registry;

    pub use crate::time::{Duration, Epoch, TimeUnits, Unit};
}
