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

use crate::linalg::{DMatrix, DVector};
use crate::time::Epoch;
use crate::utils::{is_psd, is_symmetric};
use serde_derive::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EstimateError {
    #[snafu(display("covariance is {rows}x{cols} but the mean has {dim} components"))]
    CovarShape { rows: usize, cols: usize, dim: usize },
    #[snafu(display("covariance is not symmetric"))]
    CovarNotSymmetric,
    #[snafu(display("covariance is not positive semi-definite"))]
    CovarNotPsd,
    #[snafu(display("covariance square root did not converge"))]
    SqrtFailed,
}

/// A probabilistic state estimate: mean vector and covariance matrix, tagged
/// with the epoch it is valid at.
///
/// An estimate is immutable once built. Every filter step and every predictor
/// call builds a fresh one; nothing mutates a mean or covariance in place.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEstimate {
    epoch: Epoch,
    mean: DVector<f64>,
    covar: DMatrix<f64>,
}

impl StateEstimate {
    /// Builds a state estimate, validating that the covariance is square,
    /// sized to the mean, symmetric and positive semi-definite.
    pub fn new(
        epoch: Epoch,
        mean: DVector<f64>,
        covar: DMatrix<f64>,
    ) -> Result<Self, EstimateError> {
        ensure!(
            covar.nrows() == mean.len() && covar.ncols() == mean.len(),
            CovarShapeSnafu {
                rows: covar.nrows(),
                cols: covar.ncols(),
                dim: mean.len(),
            }
        );
        ensure!(is_symmetric(&covar), CovarNotSymmetricSnafu);
        ensure!(is_psd(&covar), CovarNotPsdSnafu);
        Ok(Self { epoch, mean, covar })
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covar(&self) -> &DMatrix<f64> {
        &self.covar
    }

    /// Dimension of the estimated state.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// A square root L of the covariance, such that L * L^T = P, computed via
    /// SVD so that rank-deficient (semi-definite) covariances are handled.
    pub fn sqrt_covar(&self) -> Result<DMatrix<f64>, EstimateError> {
        sqrt_psd(&self.covar)
    }

    /// Converts this estimate into the published record shape: one entry per
    /// state dimension, keyed by the model's state names, each carrying the
    /// scalar mean and that dimension's covariance row.
    pub fn to_record(&self, state_names: &[String]) -> EstimateRecord {
        let entries = (0..self.dim())
            .map(|i| {
                let name = state_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("x{i}"));
                let covar = self.covar.row(i).iter().copied().collect();
                (
                    name,
                    Uncertainty::MeanCovar {
                        mean: self.mean[i],
                        covar,
                    },
                )
            })
            .collect();
        EstimateRecord {
            epoch: self.epoch,
            entries,
        }
    }
}

impl fmt::Display for StateEstimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let means: Vec<String> = self
            .mean
            .iter()
            .zip(self.covar.diagonal().iter())
            .map(|(m, v)| format!("{m:.6} (var {v:.3e})"))
            .collect();
        write!(f, "estimate @ {}: [{}]", self.epoch, means.join(", "))
    }
}

/// A square root of a positive semi-definite matrix, following the SVD
/// approach numpy uses for multivariate normal sampling.
pub(crate) fn sqrt_psd(m: &DMatrix<f64>) -> Result<DMatrix<f64>, EstimateError> {
    let svd = m.clone().try_svd(true, false, f64::EPSILON, 250);
    let svd = svd.context(SqrtFailedSnafu)?;
    let u = svd.u.context(SqrtFailedSnafu)?;
    let sqrt_s = svd.singular_values.map(|s| s.max(0.0).sqrt());
    let mut l = u;
    for (i, mut col) in l.column_iter_mut().enumerate() {
        col *= sqrt_s[i];
    }
    Ok(l)
}

/// The uncertainty representation of a published state dimension.
///
/// Mean/covariance is the only representation the estimators produce; the tag
/// keeps the record shape open for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Uncertainty {
    MeanCovar { mean: f64, covar: Vec<f64> },
}

/// The published form of a state estimate: per state dimension, a named entry
/// tagged with its uncertainty representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub epoch: Epoch,
    pub entries: Vec<(String, Uncertainty)>,
}

#[test]
fn test_estimate_validation() {
    let epoch = Epoch::from_tai_seconds(0.0);

    // Mismatched covariance shape
    let bad = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![1.0, 2.0]),
        DMatrix::identity(3, 3),
    );
    assert!(matches!(bad, Err(EstimateError::CovarShape { .. })));

    // Indefinite covariance
    let bad = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![1.0, 2.0]),
        DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]),
    );
    assert!(matches!(bad, Err(EstimateError::CovarNotPsd)));

    let good = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![1.0, 2.0]),
        DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.1, 1.0]),
    )
    .unwrap();
    assert_eq!(good.dim(), 2);
}

#[test]
fn test_sqrt_covar_roundtrip() {
    use approx::assert_abs_diff_eq;

    let epoch = Epoch::from_tai_seconds(0.0);
    let p = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 2.0]);
    let est = StateEstimate::new(epoch, DVector::zeros(2), p.clone()).unwrap();
    let l = est.sqrt_covar().unwrap();
    let back = &l * l.transpose();
    for i in 0..2 {
        for j in 0..2 {
            assert_abs_diff_eq!(back[(i, j)], p[(i, j)], epsilon = 1e-10);
        }
    }
}

#[test]
fn test_record_shape() {
    let epoch = Epoch::from_tai_seconds(10.0);
    let est = StateEstimate::new(
        epoch,
        DVector::from_vec(vec![0.8]),
        DMatrix::from_element(1, 1, 0.01),
    )
    .unwrap();
    let rec = est.to_record(&["charge".to_string()]);
    assert_eq!(rec.entries.len(), 1);
    let (name, Uncertainty::MeanCovar { mean, covar }) = &rec.entries[0];
    assert_eq!(name, "charge");
    assert_eq!(*mean, 0.8);
    assert_eq!(covar, &vec![0.01]);
}
