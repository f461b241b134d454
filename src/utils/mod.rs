/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra and numeric utilities for model implementations.
//
// Created on: 18 Oct 2026
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Shared helpers for solving least-squares problems, numeric conversions,
//! and working with faer matrices.

use faer::Mat;

use crate::models::dlm::DlmError;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[must_use]
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

#[must_use]
pub fn vec_to_column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |i, _| values[i])
}

#[must_use]
pub fn column_to_vec(column: &Mat<f64>) -> Vec<f64> {
    (0..column.nrows()).map(|i| column[(i, 0)]).collect()
}

#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Minimum-norm least-squares solution of `a * x ~= b` for a single-column `b`.
///
/// Singular values below `eps * max(rows, cols) * s_max` are treated as zero, so
/// rank-deficient systems resolve to the solution of smallest Euclidean norm.
///
/// # Errors
///
/// Returns `DlmError::SolveFailed` if the decomposition fails or the solution
/// contains non-finite values.
pub fn least_squares_min_norm(a: &Mat<f64>, b: &Mat<f64>) -> Result<Mat<f64>, DlmError> {
    if a.nrows() != b.nrows() || b.ncols() != 1 {
        return Err(DlmError::SolveFailed);
    }
    if a.nrows() == 0 || a.ncols() == 0 {
        return Ok(Mat::<f64>::zeros(a.ncols(), 1));
    }

    let svd = a.thin_svd().map_err(|_| DlmError::SolveFailed)?;
    let u = svd.U();
    let v = svd.V();
    let singular = svd.S().column_vector();
    let rank_dim = u.ncols();

    let s_max = (0..rank_dim).map(|k| singular[k]).fold(0.0, f64::max);
    let cutoff = f64::EPSILON * usize_to_f64(a.nrows().max(a.ncols())) * s_max;

    let mut solution = Mat::<f64>::zeros(a.ncols(), 1);
    for k in 0..rank_dim {
        let s = singular[k];
        if s <= cutoff {
            continue;
        }
        let mut projection = 0.0;
        for i in 0..a.nrows() {
            projection += u[(i, k)] * b[(i, 0)];
        }
        let scale = projection / s;
        for j in 0..a.ncols() {
            solution[(j, 0)] += v[(j, k)] * scale;
        }
    }

    if !matrix_is_finite(&solution) {
        return Err(DlmError::SolveFailed);
    }
    Ok(solution)
}

/// Sum of squared residuals `||b - a * x||^2`.
#[must_use]
pub fn residual_sum_of_squares(a: &Mat<f64>, x: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let fitted = a * x;
    (0..b.nrows())
        .map(|i| {
            let resid = b[(i, 0)] - fitted[(i, 0)];
            resid * resid
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn max_abs_diff_matches_expected_value() {
        let max = max_abs_diff(&[0.0, 1.0, 2.0], &[0.0, 0.0, 10.0]);
        assert_relative_eq!(max, 8.0);
    }

    #[test]
    fn least_squares_recovers_exact_solution() {
        let a = Mat::from_fn(4, 2, |i, j| if j == 0 { 1.0 } else { usize_to_f64(i) });
        let b = Mat::from_fn(4, 1, |i, _| 2.0f64.mul_add(usize_to_f64(i), 0.5));
        let x = least_squares_min_norm(&a, &b).expect("solve");
        assert_relative_eq!(x[(0, 0)], 0.5, epsilon = 1e-10);
        assert_relative_eq!(x[(1, 0)], 2.0, epsilon = 1e-10);
        assert!(residual_sum_of_squares(&a, &x, &b) < 1e-18);
    }

    #[test]
    fn least_squares_picks_minimum_norm_for_duplicate_columns() {
        let a = Mat::from_fn(3, 2, |_i, _j| 1.0);
        let b = Mat::from_fn(3, 1, |_i, _| 2.0);
        let x = least_squares_min_norm(&a, &b).expect("solve");
        assert_relative_eq!(x[(0, 0)], 1.0, epsilon = 1e-10);
        assert_relative_eq!(x[(1, 0)], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn least_squares_handles_underdetermined_systems() {
        let a = Mat::from_fn(1, 2, |_i, j| if j == 0 { 3.0 } else { 4.0 });
        let b = Mat::from_fn(1, 1, |_i, _| 25.0);
        let x = least_squares_min_norm(&a, &b).expect("solve");
        assert_relative_eq!(x[(0, 0)], 3.0, epsilon = 1e-10);
        assert_relative_eq!(x[(1, 0)], 4.0, epsilon = 1e-10);
    }

    #[test]
    fn least_squares_rejects_non_finite_rhs() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let b = Mat::from_fn(2, 1, |i, _| if i == 0 { f64::NAN } else { 1.0 });
        let err = least_squares_min_norm(&a, &b).expect_err("non-finite rhs should fail");
        assert!(matches!(err, DlmError::SolveFailed));
    }

    #[test]
    fn matrix_is_finite_detects_nan() {
        let matrix = Mat::from_fn(2, 1, |i, _| if i == 0 { 1.0 } else { f64::NAN });
        assert!(!matrix_is_finite(&matrix));
    }
}
