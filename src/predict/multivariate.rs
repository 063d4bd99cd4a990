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

use crate::estimate::{sqrt_psd, CovarNotPsdSnafu, CovarShapeSnafu, EstimateError};
use crate::linalg::{DMatrix, DVector};
use crate::utils::is_covariance;
use rand_distr::{Distribution, Normal};
use snafu::prelude::*;

/// A multivariate normal state sampler.
///
/// The covariance square root is taken once via SVD (the algorithm numpy
/// uses), so rank-deficient covariances, including the all-zero covariance of
/// a deterministic draw, sample cleanly: each draw is mean + L n with n a
/// vector of independent standard normal variates.
pub struct MultivariateNormal {
    mean: DVector<f64>,
    sqrt_covar: DMatrix<f64>,
    std_norm_distr: Normal<f64>,
}

impl MultivariateNormal {
    /// Creates a sampler from a mean and covariance of matching sizes; the
    /// covariance must be symmetric positive semi-definite.
    pub fn new(mean: DVector<f64>, covar: DMatrix<f64>) -> Result<Self, EstimateError> {
        ensure!(
            covar.nrows() == mean.len() && covar.ncols() == mean.len(),
            CovarShapeSnafu {
                rows: covar.nrows(),
                cols: covar.ncols(),
                dim: mean.len(),
            }
        );
        ensure!(is_covariance(&covar), CovarNotPsdSnafu);
        let sqrt_covar = sqrt_psd(&covar)?;
        Ok(Self {
            mean,
            sqrt_covar,
            std_norm_distr: Normal::new(0.0, 1.0).unwrap(),
        })
    }

    /// Same as `new` with a zero mean, as used for noise sampling.
    pub fn zero_mean(covar: DMatrix<f64>) -> Result<Self, EstimateError> {
        let dim = covar.nrows();
        Self::new(DVector::zeros(dim), covar)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl Distribution<DVector<f64>> for MultivariateNormal {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let draws = DVector::from_fn(self.mean.len(), |_, _| self.std_norm_distr.sample(rng));
        &self.mean + &self.sqrt_covar * draws
    }
}

#[test]
fn test_multivariate_dispersion() {
    use rand_pcg::Pcg64Mcg;

    let mean = DVector::from_vec(vec![1.0, -2.0]);
    let std_dev = [0.5, 2.0];
    let covar = DMatrix::from_diagonal(&DVector::from_vec(vec![
        std_dev[0] * std_dev[0],
        std_dev[1] * std_dev[1],
    ]));
    let generator = MultivariateNormal::new(mean.clone(), covar).unwrap();

    // Create a reproducible fast seed
    let rng = Pcg64Mcg::new(0);

    // About 68% of draws should fall within one sigma per component.
    let total = 1000;
    let mut within = [0_u32; 2];
    for draw in (&generator).sample_iter(rng).take(total) {
        for idx in 0..2 {
            if (draw[idx] - mean[idx]).abs() <= std_dev[idx] {
                within[idx] += 1;
            }
        }
    }
    for count in within {
        assert!(
            (600..=750).contains(&count),
            "expected roughly 68% within one sigma, got {count} of {total}"
        );
    }
}

#[test]
fn test_zero_covariance_is_deterministic() {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    let mean = DVector::from_vec(vec![0.25, 4.0]);
    let generator = MultivariateNormal::new(mean.clone(), DMatrix::zeros(2, 2)).unwrap();
    let mut rng = Pcg64Mcg::seed_from_u64(42);
    for _ in 0..5 {
        assert_eq!(generator.sample(&mut rng), mean);
    }
}

#[test]
fn test_rejects_indefinite_covariance() {
    let bad = MultivariateNormal::new(
        DVector::zeros(2),
        DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]),
    );
    assert!(matches!(bad, Err(EstimateError::CovarNotPsd)));
}
