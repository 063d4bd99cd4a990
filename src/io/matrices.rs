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

use super::ConfigError;
use crate::linalg::DMatrix;
use crate::utils::is_covariance;

/// Builds a noise covariance from the flattened row-major list of a
/// configuration file.
///
/// The list length must be a perfect square whose root matches the dimension
/// the model requires, and the resulting matrix must be symmetric positive
/// semi-definite. Anything else is a configuration error, reported before any
/// filter is built.
pub fn covar_from_flat(
    values: &[f64],
    expected_dim: usize,
    what: &'static str,
) -> Result<DMatrix<f64>, ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{what} is not set")));
    }
    let dim = integer_sqrt(values.len())
        .ok_or(ConfigError::NotSquare {
            what,
            len: values.len(),
        })?;
    if dim != expected_dim {
        return Err(ConfigError::DimensionMismatch {
            what,
            dim,
            expected: expected_dim,
        });
    }
    let matrix = DMatrix::from_row_slice(dim, dim, values);
    if !is_covariance(&matrix) {
        return Err(ConfigError::NotPsd { what });
    }
    Ok(matrix)
}

/// The exact integer square root of `len`, or None if `len` is not a perfect
/// square.
fn integer_sqrt(len: usize) -> Option<usize> {
    let root = (len as f64).sqrt().round() as usize;
    (root * root == len).then_some(root)
}

#[test]
fn test_covar_from_flat() {
    // A valid 2x2, row-major.
    let m = covar_from_flat(&[1.0, 0.1, 0.1, 2.0], 2, "Q").unwrap();
    assert_eq!(m[(0, 0)], 1.0);
    assert_eq!(m[(0, 1)], 0.1);
    assert_eq!(m[(1, 1)], 2.0);

    // Not a perfect square.
    assert!(matches!(
        covar_from_flat(&[1.0, 2.0, 3.0], 2, "Q"),
        Err(ConfigError::NotSquare { len: 3, .. })
    ));

    // Square, but not the model's dimension.
    assert!(matches!(
        covar_from_flat(&[1.0], 2, "Q"),
        Err(ConfigError::DimensionMismatch {
            dim: 1,
            expected: 2,
            ..
        })
    ));

    // Asymmetric.
    assert!(matches!(
        covar_from_flat(&[1.0, 0.5, 0.0, 1.0], 2, "Q"),
        Err(ConfigError::NotPsd { .. })
    ));

    // Symmetric but indefinite.
    assert!(matches!(
        covar_from_flat(&[1.0, 2.0, 2.0, 1.0], 2, "Q"),
        Err(ConfigError::NotPsd { .. })
    ));

    // Empty list.
    assert!(matches!(
        covar_from_flat(&[], 1, "Q"),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_integer_sqrt() {
    assert_eq!(integer_sqrt(1), Some(1));
    assert_eq!(integer_sqrt(4), Some(2));
    assert_eq!(integer_sqrt(9), Some(3));
    assert_eq!(integer_sqrt(2), None);
    assert_eq!(integer_sqrt(8), None);
}
