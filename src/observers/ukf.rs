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

/// A sigma-point (derivative-free) Kalman filter.
///
/// Mean and covariance are propagated through the nonlinear model equations
/// by a deterministic set of 2n+1 sample states, regenerated from the current
/// estimate at every step. The scaling parameters `alpha` and `kappa` are
/// fixed at construction; the weights they imply always sum to 1.
pub struct UnscentedKalmanFilter {
    model: Arc<dyn Model>,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    alpha: f64,
    kappa: f64,
    weights: DVector<f64>,
    belief: Option<Belief>,
}

impl UnscentedKalmanFilter {
    /// Builds a UKF for the provided model. Q must be state-sized, R
    /// output-sized, both symmetric positive semi-definite; `alpha` must be
    /// in (0, 1] and `kappa` must satisfy n + kappa > 0.
    pub fn new(
        model: Arc<dyn Model>,
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        alpha: f64,
        kappa: f64,
    ) -> Result<Self, ConfigError> {
        validate_noise(model.as_ref(), &q, &r)?;
        let n = model.state_size();
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "UKF alpha must be in (0, 1], got {alpha}"
            )));
        }
        if n as f64 + kappa <= 0.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "UKF kappa must satisfy n + kappa > 0, got kappa = {kappa} for n = {n}"
            )));
        }
        let weights = sigma_weights(n, alpha, kappa);
        info!("created UKF (n = {n}, alpha = {alpha}, kappa = {kappa})");
        Ok(Self {
            model,
            q,
            r,
            alpha,
            kappa,
            weights,
            belief: None,
        })
    }

    /// Builds a UKF from the noise lists and scaling parameters of the
    /// provided configuration.
    pub fn from_config(model: Arc<dyn Model>, cfg: &ProgConfig) -> Result<Self, ConfigError> {
        let q = cfg.process_noise_matrix(model.as_ref())?;
        let r = cfg.measurement_noise_matrix(model.as_ref())?;
        Self::new(model, q, r, cfg.alpha, cfg.kappa)
    }

    /// The sigma point weights, in point order (mean point first).
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Deterministically regenerates the 2n+1 sigma points for the provided
    /// mean and covariance: the mean itself, then mean plus/minus the
    /// alpha-scaled columns of the Cholesky root of (n + kappa) P.
    fn sigma_points(
        &self,
        mean: &DVector<f64>,
        covar: &DMatrix<f64>,
        op: &'static str,
    ) -> Result<Vec<DVector<f64>>, ObserverError> {
        let n = mean.len();
        let scaled = covar * (n as f64 + self.kappa);
        let chol = scaled.cholesky().context(CovarianceNotPsdSnafu { op })?;
        let l = chol.l();
        let mut points = Vec::with_capacity(2 * n + 1);
        points.push(mean.clone());
        for j in 0..n {
            let offset = l.column(j) * self.alpha;
            points.push(mean + &offset);
        }
        for j in 0..n {
            let offset = l.column(j) * self.alpha;
            points.push(mean - &offset);
        }
        Ok(points)
    }

    fn weighted_mean(&self, points: &[DVector<f64>]) -> DVector<f64> {
        let mut mean = DVector::zeros(points[0].len());
        for (w, p) in self.weights.iter().zip(points) {
            mean += p * *w;
        }
        mean
    }

    /// Weighted scatter sum_i w_i (a_i - mean_a)(b_i - mean_b)^T. With
    /// identical arguments this is a covariance, otherwise a cross-covariance.
    fn weighted_scatter(
        &self,
        points_a: &[DVector<f64>],
        mean_a: &DVector<f64>,
        points_b: &[DVector<f64>],
        mean_b: &DVector<f64>,
    ) -> DMatrix<f64> {
        let mut scatter = DMatrix::zeros(mean_a.len(), mean_b.len());
        for ((w, a), b) in self.weights.iter().zip(points_a).zip(points_b) {
            let da = a - mean_a;
            let db = b - mean_b;
            scatter += da * db.transpose() * *w;
        }
        scatter
    }
}

impl Observer for UnscentedKalmanFilter {
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
        debug!("UKF initialized at {t0}");
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
        let zero_w = zero_noise(self.model.state_size());
        let zero_v = zero_noise(self.model.output_size());

        // Predict: propagate the sigma points of the current estimate through
        // the state equation with zero process noise, under the input that
        // was applied since the previous sample.
        let sigma = self.sigma_points(&belief.mean, &belief.covar, "sigma point generation")?;
        let propagated: Vec<DVector<f64>> = sigma
            .iter()
            .map(|x| {
                self.model
                    .state_eqn(t_prev, x, &belief.prev_input, &zero_w, dt)
            })
            .collect();
        let prior_mean = self.weighted_mean(&propagated);
        let prior_covar = symmetrize(
            &(self.weighted_scatter(&propagated, &prior_mean, &propagated, &prior_mean) + &self.q),
        );

        // Re-sigma-point the prior and push it through the output equation.
        let resigma = self.sigma_points(&prior_mean, &prior_covar, "prior sigma regeneration")?;
        let outputs: Vec<DVector<f64>> = resigma
            .iter()
            .map(|x| self.model.output_eqn(t_now, x, u, &zero_v))
            .collect();
        let output_mean = self.weighted_mean(&outputs);
        let pzz = self.weighted_scatter(&outputs, &output_mean, &outputs, &output_mean) + &self.r;
        let pxz = self.weighted_scatter(&resigma, &prior_mean, &outputs, &output_mean);

        // Update.
        let pzz_inv = pzz
            .clone()
            .try_inverse()
            .ok_or(ObserverError::SingularInnovation)?;
        let gain = &pxz * pzz_inv;
        let mean = &prior_mean + &gain * (z - &output_mean);
        let covar = symmetrize(&(prior_covar - &gain * &pzz * gain.transpose()));
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
        trace!("UKF stepped to {t}");
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

impl fmt::Display for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "UKF (n = {}, alpha = {}, kappa = {})",
            self.model.state_size(),
            self.alpha,
            self.kappa
        )
    }
}

impl fmt::Debug for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UnscentedKalmanFilter")
            .field("n", &self.model.state_size())
            .field("q", &self.q)
            .field("r", &self.r)
            .field("alpha", &self.alpha)
            .field("kappa", &self.kappa)
            .field("weights", &self.weights)
            .field("belief", &self.belief)
            .finish()
    }
}

/// The GSAP-style scaled sigma point weights: the unscaled set is
/// w0 = kappa/(n+kappa), wi = 0.5/(n+kappa), then the scaled unscented
/// transform maps w0 to w0/alpha^2 + (1 - 1/alpha^2) and wi to wi/alpha^2,
/// which preserves a total of exactly 1.
fn sigma_weights(n: usize, alpha: f64, kappa: f64) -> DVector<f64> {
    let nk = n as f64 + kappa;
    let a2 = alpha * alpha;
    let mut weights = DVector::from_element(2 * n + 1, 0.5 / (nk * a2));
    weights[0] = kappa / (nk * a2) + (1.0 - 1.0 / a2);
    weights
}

#[test]
fn test_weights_sum_to_one() {
    use approx::assert_abs_diff_eq;

    for (n, alpha, kappa) in [
        (1, 1.0, 0.0),
        (1, 0.5, 2.0),
        (3, 1.0, 3.0),
        (6, 0.1, -2.0),
        (12, 0.3, 0.5),
    ] {
        let w = sigma_weights(n, alpha, kappa);
        assert_eq!(w.len(), 2 * n + 1);
        assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_sigma_points_recombine() {
    use super::testing::DriftModel;
    use approx::assert_abs_diff_eq;

    let model = DriftModel::shared();
    let q = DMatrix::identity(2, 2) * 1e-4;
    let r = DMatrix::identity(1, 1) * 1e-4;
    let ukf = UnscentedKalmanFilter::new(model, q, r, 1.0, 0.0).unwrap();

    let mean = DVector::from_vec(vec![1.0, -0.5]);
    let covar = DMatrix::from_row_slice(2, 2, &[0.2, 0.05, 0.05, 0.1]);
    let points = ukf.sigma_points(&mean, &covar, "test").unwrap();
    assert_eq!(points.len(), 5);

    // The weighted recombination must reproduce the generating moments.
    let recombined_mean = ukf.weighted_mean(&points);
    let recombined_cov = ukf.weighted_scatter(&points, &recombined_mean, &points, &recombined_mean);
    for i in 0..2 {
        assert_abs_diff_eq!(recombined_mean[i], mean[i], epsilon = 1e-10);
        for j in 0..2 {
            assert_abs_diff_eq!(recombined_cov[(i, j)], covar[(i, j)], epsilon = 1e-9);
        }
    }
}

#[test]
fn test_step_requires_initialize() {
    use super::testing::DriftModel;

    let model = DriftModel::shared();
    let q = DMatrix::identity(2, 2) * 1e-4;
    let r = DMatrix::identity(1, 1) * 1e-4;
    let mut ukf = UnscentedKalmanFilter::new(model, q, r, 1.0, 0.0).unwrap();

    let t = Epoch::from_tai_seconds(1.0);
    let u = DVector::zeros(1);
    let z = DVector::zeros(1);
    assert_eq!(
        ukf.step(t, &u, &z).unwrap_err(),
        ObserverError::NotInitialized
    );
    assert!(ukf.state_estimate().is_err());
}
