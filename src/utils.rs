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

/// Relative tolerance applied to symmetry and eigenvalue checks, scaled by the
/// largest diagonal magnitude of the matrix under test.
pub const COVAR_TOL: f64 = 1e-9;

/// Returns a zero vector of the requested length, used wherever a noise-free
/// evaluation of a model equation is needed.
pub fn zero_noise(len: usize) -> DVector<f64> {
    DVector::zeros(len)
}

/// Returns the symmetric part of the provided matrix, 0.5 * (M + M^T).
///
/// Covariance updates accumulate floating point asymmetry; every filter in
/// this crate symmetrizes after each update so the PSD checks stay meaningful.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

fn tolerance_for(m: &DMatrix<f64>) -> f64 {
    let scale = m.diagonal().iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    COVAR_TOL * scale
}

/// Returns whether the matrix is square and symmetric within tolerance.
pub fn is_symmetric(m: &DMatrix<f64>) -> bool {
    if !m.is_square() {
        return false;
    }
    let tol = tolerance_for(m);
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            if (m[(i, j)] - m[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}

/// Returns whether the symmetric matrix is positive semi-definite, by checking
/// that no eigenvalue is below the (scaled) tolerance. The caller must have
/// established symmetry first.
pub fn is_psd(m: &DMatrix<f64>) -> bool {
    if !m.is_square() {
        return false;
    }
    if m.is_empty() {
        return true;
    }
    let tol = tolerance_for(m);
    m.clone()
        .symmetric_eigenvalues()
        .iter()
        .all(|eig| *eig >= -tol)
}

/// Checks that the provided matrix is a valid covariance: square, symmetric
/// and positive semi-definite.
pub fn is_covariance(m: &DMatrix<f64>) -> bool {
    is_symmetric(m) && is_psd(m)
}

#[test]
fn test_symmetrize() {
    let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 4.0, 3.0]);
    let s = symmetrize(&m);
    assert!(is_symmetric(&s));
    assert_eq!(s[(0, 1)], 3.0);
    assert_eq!(s[(1, 0)], 3.0);
}

#[test]
fn test_psd_checks() {
    let good = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
    assert!(is_covariance(&good));

    // Negative eigenvalue
    let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
    assert!(is_symmetric(&indefinite));
    assert!(!is_psd(&indefinite));

    // Asymmetric
    let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.2, 1.0]);
    assert!(!is_symmetric(&asym));

    // Semi-definite (rank deficient) is accepted
    let semi = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
    assert!(is_covariance(&semi));
}

#[test]
fn test_zero_noise() {
    let z = zero_noise(3);
    assert_eq!(z.len(), 3);
    assert!(z.iter().all(|v| *v == 0.0));
}
