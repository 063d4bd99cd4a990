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

use crate::linalg::DVector;
use crate::time::Epoch;
use crate::utils::zero_noise;

/// Converts an epoch to the scalar time the model equations consume.
///
/// Models receive absolute TAI seconds; a model needing elapsed time keeps its
/// own reference.
pub fn model_secs(epoch: Epoch) -> f64 {
    epoch.to_tai_seconds()
}

/// The state-space contract of a physical system under management.
///
/// A model is a pure description: every function is a deterministic function
/// of its arguments, with no internal mutable state beyond fixed parameters.
/// Both the observers and the predictors consume the same instance through an
/// `Arc<dyn Model>`, possibly from several threads at once.
///
/// Callers supply explicit noise sample vectors. A noise-free evaluation is
/// requested by passing zeros, which the [state_zero_noise] and
/// [output_zero_noise] helpers do.
///
/// [state_zero_noise]: Model::state_zero_noise
/// [output_zero_noise]: Model::output_zero_noise
pub trait Model: Send + Sync {
    /// Number of components in the state vector.
    fn state_size(&self) -> usize;

    /// Number of components in the input (load/usage) vector.
    fn input_size(&self) -> usize;

    /// Number of components in the measured output vector.
    fn output_size(&self) -> usize;

    /// Ordered names of the state scalars. Published estimate records are
    /// keyed by these names.
    fn state_names(&self) -> &[String];

    /// Names of the monitored threshold events, in the order the flags of
    /// [threshold_eqn](Model::threshold_eqn) are returned.
    fn event_names(&self) -> &[String];

    /// State transition: the state `dt_s` seconds after `t_s`, given the
    /// current state `x`, the input `u` and a process noise sample.
    fn state_eqn(
        &self,
        t_s: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        process_noise: &DVector<f64>,
        dt_s: f64,
    ) -> DVector<f64>;

    /// Output equation: the expected sensor outputs at `t_s` for state `x`,
    /// input `u` and a measurement noise sample.
    fn output_eqn(
        &self,
        t_s: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        measurement_noise: &DVector<f64>,
    ) -> DVector<f64>;

    /// Threshold predicate: one flag per monitored event, true when that
    /// event condition holds at `t_s` for state `x` under input `u`.
    fn threshold_eqn(&self, t_s: f64, x: &DVector<f64>, u: &DVector<f64>) -> Vec<bool>;

    /// Derives an initial state estimate from the first observed input and
    /// output pair. Used by the prognoser to seed the observer when the first
    /// sample arrives.
    fn initial_state(&self, u: &DVector<f64>, z: &DVector<f64>) -> DVector<f64>;

    /// Noise-free state transition.
    fn state_zero_noise(
        &self,
        t_s: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt_s: f64,
    ) -> DVector<f64> {
        self.state_eqn(t_s, x, u, &zero_noise(self.state_size()), dt_s)
    }

    /// Noise-free output evaluation.
    fn output_zero_noise(&self, t_s: f64, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        self.output_eqn(t_s, x, u, &zero_noise(self.output_size()))
    }
}
