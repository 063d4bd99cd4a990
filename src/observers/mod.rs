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
use crate::linalg::{DMatrix, DVector};
use crate::model::Model;
use crate::time::Epoch;
use crate::utils::is_covariance;
use snafu::prelude::*;

mod ekf;
mod ukf;

pub use ekf::ExtendedKalmanFilter;
pub use ukf::UnscentedKalmanFilter;

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ObserverError {
    #[snafu(display("observer must be initialized before this call"))]
    NotInitialized,
    #[snafu(display("time has not advanced: last processed {last}, got {t}"))]
    TimeNotAdvanced { last: Epoch, t: Epoch },
    #[snafu(display("{what} has {got} components, the model requires {expected}"))]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[snafu(display("covariance lost positive semi-definiteness during {op}"))]
    CovarianceNotPsd { op: &'static str },
    #[snafu(display("innovation covariance is singular"))]
    SingularInnovation,
    #[snafu(display("updated estimate rejected: {source}"))]
    BadEstimate { source: EstimateError },
}

/// A recursive state estimator: maintains a probabilistic estimate of the
/// hidden model state from a stream of (input, measured output) pairs.
///
/// An observer starts uninitialized. `initialize` seeds the first estimate
/// from a known state and may be called again at any time to re-seed; `step`
/// before the first `initialize` is a precondition error. On any error the
/// observer state is left exactly as it was: estimates are committed
/// wholesale, never partially.
pub trait Observer: Send {
    /// Seeds the estimate at `t0`: mean `x0`, covariance Q, and the expected
    /// output from a noise-free output evaluation under input `u0`.
    fn initialize(
        &mut self,
        t0: Epoch,
        x0: &DVector<f64>,
        u0: &DVector<f64>,
    ) -> Result<(), ObserverError>;

    /// Advances the estimate to `t` with the input `u` applied since the last
    /// call and the measured output `z`. Requires initialization and
    /// `t > last_time()`.
    fn step(&mut self, t: Epoch, u: &DVector<f64>, z: &DVector<f64>)
        -> Result<(), ObserverError>;

    fn is_initialized(&self) -> bool;

    /// Epoch of the last processed sample, if initialized.
    fn last_time(&self) -> Option<Epoch>;

    /// The current estimate as mean and covariance, never a point estimate.
    fn state_estimate(&self) -> Result<StateEstimate, ObserverError>;

    /// The expected (noise-free) model output at the current estimate.
    fn latest_output(&self) -> Option<&DVector<f64>>;
}

/// The filtered quantities every Kalman variant carries between steps. The
/// whole struct is rebuilt and swapped in at the end of a successful step.
#[derive(Debug, Clone)]
pub(crate) struct Belief {
    pub last_time: Epoch,
    pub mean: DVector<f64>,
    pub covar: DMatrix<f64>,
    pub expected_output: DVector<f64>,
    pub prev_input: DVector<f64>,
}

/// Validates the noise covariance pair against the model dimensions. Called
/// by every observer constructor so that a half-built filter never exists.
pub(crate) fn validate_noise(
    model: &dyn Model,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
) -> Result<(), ConfigError> {
    check_covar(q, model.state_size(), "process noise Q")?;
    check_covar(r, model.output_size(), "measurement noise R")?;
    Ok(())
}

pub(crate) fn check_covar(
    m: &DMatrix<f64>,
    expected: usize,
    what: &'static str,
) -> Result<(), ConfigError> {
    if !m.is_square() {
        return Err(ConfigError::NotSquare {
            what,
            len: m.nrows() * m.ncols(),
        });
    }
    if m.nrows() != expected {
        return Err(ConfigError::DimensionMismatch {
            what,
            dim: m.nrows(),
            expected,
        });
    }
    if !is_covariance(m) {
        return Err(ConfigError::NotPsd { what });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::linalg::DVector;
    use crate::model::Model;
    use std::sync::Arc;

    /// Two-state constant-drift model used by the filter unit tests: the
    /// level integrates the rate, only the level is observed.
    pub struct DriftModel {
        states: Vec<String>,
        events: Vec<String>,
    }

    impl DriftModel {
        pub fn shared() -> Arc<dyn Model> {
            Arc::new(Self {
                states: vec!["level".to_string(), "rate".to_string()],
                events: vec!["depleted".to_string()],
            })
        }
    }

    impl Model for DriftModel {
        fn state_size(&self) -> usize {
            2
        }

        fn input_size(&self) -> usize {
            1
        }

        fn output_size(&self) -> usize {
            1
        }

        fn state_names(&self) -> &[String] {
            &self.states
        }

        fn event_names(&self) -> &[String] {
            &self.events
        }

        fn state_eqn(
            &self,
            _t_s: f64,
            x: &DVector<f64>,
            _u: &DVector<f64>,
            process_noise: &DVector<f64>,
            dt_s: f64,
        ) -> DVector<f64> {
            DVector::from_vec(vec![
                x[0] + x[1] * dt_s + process_noise[0],
                x[1] + process_noise[1],
            ])
        }

        fn output_eqn(
            &self,
            _t_s: f64,
            x: &DVector<f64>,
            _u: &DVector<f64>,
            measurement_noise: &DVector<f64>,
        ) -> DVector<f64> {
            DVector::from_vec(vec![x[0] + measurement_noise[0]])
        }

        fn threshold_eqn(&self, _t_s: f64, x: &DVector<f64>, _u: &DVector<f64>) -> Vec<bool> {
            vec![x[0] <= 0.0]
        }

        fn initial_state(&self, _u: &DVector<f64>, z: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![z[0], 0.0])
        }
    }
}

/// Checks the dimensions of a (input, output) pair fed to `step`.
pub(crate) fn check_step_dims(
    model: &dyn Model,
    u: &DVector<f64>,
    z: &DVector<f64>,
) -> Result<(), ObserverError> {
    ensure!(
        u.len() == model.input_size(),
        DimensionMismatchSnafu {
            what: "input vector",
            expected: model.input_size(),
            got: u.len(),
        }
    );
    ensure!(
        z.len() == model.output_size(),
        DimensionMismatchSnafu {
            what: "output vector",
            expected: model.output_size(),
            got: z.len(),
        }
    );
    Ok(())
}
