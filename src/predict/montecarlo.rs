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

use super::multivariate::MultivariateNormal;
use super::results::Prediction;
use super::{
    InputProfile, PredictConfig, PredictionError, Predictor, ProfileDimensionSnafu,
    StateDimensionSnafu, UnsampleableDistributionSnafu,
};
use crate::estimate::StateEstimate;
use crate::io::ConfigError;
use crate::linalg::{DMatrix, DVector};
use crate::model::{model_secs, Model};
use crate::observers::check_covar;
use crate::time::Epoch;
use rand_distr::Distribution;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use snafu::prelude::*;
use std::fmt;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Instant as StdInstant;

/// A Monte Carlo end-of-life predictor, automatically running its particles
/// on the rayon thread pool.
///
/// Each particle is drawn from the provided state distribution, then
/// simulated forward in fixed steps, drawing process noise from Q at every
/// step, until a monitored threshold event fires or the horizon censors it.
/// Particles share nothing mutable, and each owns a deterministically derived
/// RNG stream, so a fixed seed gives bit-identical outcomes regardless of
/// thread scheduling.
pub struct MonteCarloPredictor {
    model: Arc<dyn Model>,
    config: PredictConfig,
    process_noise: MultivariateNormal,
}

impl MonteCarloPredictor {
    /// Builds a predictor for the provided model. Q must be sized to the
    /// model state and symmetric positive semi-definite; the configuration is
    /// validated eagerly.
    pub fn new(
        model: Arc<dyn Model>,
        q: DMatrix<f64>,
        config: PredictConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        check_covar(&q, model.state_size(), "process noise Q")?;
        let process_noise = MultivariateNormal::zero_mean(q).map_err(|_| ConfigError::NotPsd {
            what: "process noise Q",
        })?;
        info!(
            "created Monte Carlo predictor ({} particles, horizon {}, step {})",
            config.sample_count, config.horizon, config.step
        );
        Ok(Self {
            model,
            config,
            process_noise,
        })
    }

    /// Builds a predictor from the noise list and sampling section of the
    /// provided configuration.
    pub fn from_config(
        model: Arc<dyn Model>,
        cfg: &crate::io::ProgConfig,
    ) -> Result<Self, ConfigError> {
        let q = cfg.predictor_noise_matrix(model.as_ref())?;
        Self::new(model, q, cfg.predict_config())
    }

    /// Simulates a single particle from `x` at `epoch` until an event fires
    /// or the horizon is reached.
    fn simulate(
        &self,
        index: usize,
        epoch: Epoch,
        mut x: DVector<f64>,
        profile: &dyn InputProfile,
    ) -> Option<Epoch> {
        let mut rng = Pcg64Mcg::new(particle_seed(self.config.seed, index));
        let step = self.config.step;
        let dt_s = step.to_seconds();
        let end = epoch + self.config.horizon;
        let mut t = epoch;
        while t < end {
            let u = profile.input_at(t);
            let noise = self.process_noise.sample(&mut rng);
            x = self.model.state_eqn(model_secs(t), &x, &u, &noise, dt_s);
            let t_next = t + step;
            let u_next = profile.input_at(t_next);
            let fired = self
                .model
                .threshold_eqn(model_secs(t_next), &x, &u_next)
                .iter()
                .any(|event| *event);
            if fired {
                return Some(t_next);
            }
            t = t_next;
        }
        None
    }
}

impl Predictor for MonteCarloPredictor {
    fn predict(
        &self,
        epoch: Epoch,
        estimate: &StateEstimate,
        profile: &dyn InputProfile,
    ) -> Result<Prediction, PredictionError> {
        ensure!(
            estimate.dim() == self.model.state_size(),
            StateDimensionSnafu {
                expected: self.model.state_size(),
                got: estimate.dim(),
            }
        );
        let u0 = profile.input_at(epoch);
        ensure!(
            u0.len() == self.model.input_size(),
            ProfileDimensionSnafu {
                expected: self.model.input_size(),
                got: u0.len(),
            }
        );

        let sampler = MultivariateNormal::new(estimate.mean().clone(), estimate.covar().clone())
            .context(UnsampleableDistributionSnafu)?;

        // Draw all initial states sequentially: the generator RNG is not
        // shared across threads.
        let rng = Pcg64Mcg::new(self.config.seed as u128);
        let num_particles = self.config.sample_count;
        let init_states: Vec<(usize, DVector<f64>)> = (&sampler)
            .sample_iter(rng)
            .take(num_particles)
            .enumerate()
            .collect();

        // Simulate on the thread pool, collect and re-order by particle
        // index. The channel is the single synchronization barrier.
        let (tx, rx) = channel();
        let start = StdInstant::now();
        init_states.par_iter().for_each_with(tx, |tx, (index, x0)| {
            let outcome = self.simulate(*index, epoch, x0.clone(), profile);
            tx.send((*index, outcome)).unwrap();
        });
        let mut runs: Vec<(usize, Option<Epoch>)> = rx.iter().collect();
        runs.par_sort_by_key(|(index, _)| *index);
        debug!(
            "simulated {} particles in {:.3} s",
            num_particles,
            start.elapsed().as_secs_f64()
        );

        let weight = 1.0 / num_particles as f64;
        let mut outcomes = Vec::with_capacity(num_particles);
        let mut censored = 0;
        for (_, outcome) in runs {
            match outcome {
                Some(event_epoch) => outcomes.push((event_epoch, weight)),
                None => censored += 1,
            }
        }

        Ok(Prediction {
            epoch,
            outcomes,
            censored,
            sample_count: num_particles,
            seed: self.config.seed,
        })
    }
}

impl fmt::Display for MonteCarloPredictor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Monte Carlo predictor - {} particles - seed: {}",
            self.config.sample_count, self.config.seed
        )
    }
}

/// A distinct, reproducible RNG stream per particle. The master generator
/// seed occupies the low word, so no particle stream collides with it.
fn particle_seed(seed: u64, index: usize) -> u128 {
    ((index as u128 + 1) << 64) | seed as u128
}

#[test]
fn test_particle_seeds_are_distinct() {
    let mut seen = std::collections::HashSet::new();
    seen.insert(7_u128);
    for index in 0..1000 {
        assert!(seen.insert(particle_seed(7, index)));
    }
}
