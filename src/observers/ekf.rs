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

use super::{
    check_step_dims, validate_noise, BadEstimateSnafu, Belief, CovarianceNotPsdSnafu, Observer,
    ObserverError, TimeNotAdvancedSnafu,
};
use crate::estimate::StateEstimate;
use crate::io::{ConfigError, ProgConfig};
use crate::linalg::{DMatrix, DVector};
use crate::model::{model_secs, Model};
use crate::time::Epoch;
use crate::utils::{is_covariance, symmetrize, zero_noise};
use snafu::prelude::*;
use std::fmt;
use std::sync::Arc;

/// A Jacobian-linearized Kalman filter.
///
/// The state and output equations are linearized at the current estimate by
/// central finite differences; the covariance is propagated as F P F^T + Q
/// and updated with the textbook gain K = P H^T (H P H^T + R)^-1.
pub struct ExtendedKalmanFilter {
    model: Arc<dyn Model>,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    /// Relative step for the central finite differences.
    fd_step: f64,
    belief: Option<Belief>,
}

impl ExtendedKalmanFilter {
    /// Builds an EKF for the provided model. Q must be state-sized, R
    /// output-sized, both symmetric positive semi-definite.
    pub fn new(
        model: Arc<dyn Model>,
        q: DMatrix<f64>,
        r: DMatrix<f64>,
    ) -> Result<Self, ConfigError> {
        validate_noise(model.as_ref(), &q, &r)?;
        info!("created EKF (n = {})", model.state_size());
        Ok(Self {
            model,
            q,
            r,
            fd_step: f64::EPSILON.cbrt(),
            belief: None,
        })
    }

    /// Builds an EKF from the noise lists of the provided configuration.
    pub fn from_config(model: Arc<dyn Model>, cfg: &ProgConfig) -> Result<Self, ConfigError> {
        let q = cfg.process_noise_matrix(model.as_ref())?;
        let r = cfg.measurement_noise_matrix(model.as_ref())?;
        Self::new(model, q, r)
    }

    /// Central finite difference Jacobian of `f` at `x`, one column per state
    /// component. The step is scaled to the magnitude of each component.
    fn jacobian<F>(&self, x: &DVector<f64>, rows: usize, f: F) -> DMatrix<f64>
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let n = x.len();
        let mut jac = DMatrix::zeros(rows, n);
        for col in 0..n {
            let h = self.fd_step * x[col].abs().max(1.0);
            let mut forward = x.clone();
            forward[col] += h;
            let mut backward = x.clone();
            backward[col] -= h;
            let column = (f(&forward) - f(&backward)) / (2.0 * h);
            jac.set_column(col, &column);
        }
        jac
    }
}

impl Observer for ExtendedKalmanFilter {
    fn initialize(
        &mut self,
        t0: Epoch,
        x0: &DVector<f64>,
        u0: &DVector<f64>,
    ) -> Result<(), ObserverError> {
        ensure!(
            x0.len() == self.model.state_size(),
            super::DimensionMismatchSnafu {
                what: "initial state",
                expected: self.model.state_size(),
                got: x0.len(),
            }
        );
        ensure!(
            u0.len() == self.model.input_size(),
            super::DimensionMismatchSnafu {
                what: "initial input",
                expected: self.model.input_size(),
                got: u0.len(),
            }
        );
        let expected_output = self.model.output_zero_noise(model_secs(t0), x0, u0);
        self.belief = Some(Belief {
            last_time: t0,
            mean: x0.clone(),
            covar: self.q.clone(),
            expected_output,
            prev_input: u0.clone(),
        });
        debug!("EKF initialized at {t0}");
        Ok(())
    }

    fn step(
        &mut self,
        t: Epoch,
        u: &DVector<f64>,
        z: &DVector<f64>,
    ) -> Result<(), ObserverError> {
        let belief = self.belief.as_ref().ok_or(ObserverError::NotInitialized)?;
        ensure!(
            t > belief.last_time,
            TimeNotAdvancedSnafu {
                last: belief.last_time,
                t,
            }
        );
        check_step_dims(self.model.as_ref(), u, z)?;

        let dt = (t - belief.last_time).to_seconds();
        let t_prev = model_secs(belief.last_time);
        let t_now = model_secs(t);
        let n = self.model.state_size();
        let zero_w = zero_noise(n);

        // Predict: linearize the state equation at the current mean, under
        // the input that was applied since the previous sample.
        let prev_input = belief.prev_input.clone();
        let f_jac = self.jacobian(&belief.mean, n, |x| {
            self.model.state_eqn(t_prev, x, &prev_input, &zero_w, dt)
        });
        let prior_mean = self
            .model
            .state_eqn(t_prev, &belief.mean, &prev_input, &zero_w, dt);
        let prior_covar = symmetrize(&(&f_jac * &belief.covar * f_jac.transpose() + &self.q));
        ensure!(
            is_covariance(&prior_covar),
            CovarianceNotPsdSnafu { op: "time update" }
        );

        // Update: linearize the output equation at the prior mean.
        let h_jac = self.jacobian(&prior_mean, self.model.output_size(), |x| {
            self.model.output_zero_noise(t_now, x, u)
        });
        let predicted_output = self.model.output_zero_noise(t_now, &prior_mean, u);
        let innovation_covar = &h_jac * &prior_covar * h_jac.transpose() + &self.r;
        let innovation_inv = innovation_covar
            .try_inverse()
            .ok_or(ObserverError::SingularInnovation)?;
        let gain = &prior_covar * h_jac.transpose() * innovation_inv;
        let mean = &prior_mean + &gain * (z - &predicted_output);
        let identity = DMatrix::identity(n, n);
        let covar = symmetrize(&((identity - &gain * &h_jac) * &prior_covar));
        ensure!(
            is_covariance(&covar),
            CovarianceNotPsdSnafu {
                op: "measurement update",
            }
        );
        let expected_output = self.model.output_zero_noise(t_now, &mean, u);

        // Commit wholesale: nothing above touched self.
        self.belief = Some(Belief {
            last_time: t,
            mean,
            covar,
            expected_output,
            prev_input: u.clone(),
        });
        trace!("EKF stepped to {t}");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.belief.is_some()
    }

    fn last_time(&self) -> Option<Epoch> {
        self.belief.as_ref().map(|b| b.last_time)
    }

    fn state_estimate(&self) -> Result<StateEstimate, ObserverError> {
        let belief = self.belief.as_ref().ok_or(ObserverError::NotInitialized)?;
        StateEstimate::new(belief.last_time, belief.mean.clone(), belief.covar.clone())
            .context(BadEstimateSnafu)
    }

    fn latest_output(&self) -> Option<&DVector<f64>> {
        self.belief.as_ref().map(|b| &b.expected_output)
    }
}

impl fmt::Display for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EKF (n = {})", self.model.state_size())
    }
}

impl fmt::Debug for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExtendedKalmanFilter")
            .field("n", &self.model.state_size())
            .field("q", &self.q)
            .field("r", &self.r)
            .field("fd_step", &self.fd_step)
            .field("belief", &self.belief)
            .finish()
    }
}

#[test]
fn test_jacobian_of_linear_model() {
    use super::testing::DriftModel;
    use approx::assert_abs_diff_eq;

    let model = DriftModel::shared();
    let q = DMatrix::identity(2, 2) * 1e-4;
    let r = DMatrix::identity(1, 1) * 1e-4;
    let ekf = ExtendedKalmanFilter::new(model.clone(), q, r).unwrap();

    // For the drift model the state Jacobian is [[1, dt], [0, 1]] exactly.
    let dt = 2.0;
    let x = DVector::from_vec(vec![3.0, -0.25]);
    let u = DVector::zeros(1);
    let zero = zero_noise(2);
    let f_jac = ekf.jacobian(&x, 2, |x| model.state_eqn(0.0, x, &u, &zero, dt));
    let expected = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
    for i in 0..2 {
        for j in 0..2 {
            assert_abs_diff_eq!(f_jac[(i, j)], expected[(i, j)], epsilon = 1e-6);
        }
    }
}

#[test]
fn test_stale_timestamp_rejected() {
    use super::testing::DriftModel;

    let model = DriftModel::shared();
    let q = DMatrix::identity(2, 2) * 1e-4;
    let r = DMatrix::identity(1, 1) * 1e-4;
    let mut ekf = ExtendedKalmanFilter::new(model, q, r).unwrap();

    let t0 = Epoch::from_tai_seconds(100.0);
    let u = DVector::zeros(1);
    ekf.initialize(t0, &DVector::from_vec(vec![1.0, 0.0]), &u)
        .unwrap();
    let before = ekf.state_estimate().unwrap();

    // Same timestamp: rejected, estimate untouched.
    let z = DVector::from_vec(vec![1.0]);
    assert!(matches!(
        ekf.step(t0, &u, &z),
        Err(ObserverError::TimeNotAdvanced { .. })
    ));
    assert_eq!(ekf.state_estimate().unwrap(), before);
}
