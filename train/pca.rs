//! Principal component counting.
//!
//! Only the number of components is needed downstream (it is reported next
//! to the model metrics), so only the eigenvalues of the sample covariance
//! matrix are computed.

use ndarray::{Array2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{EigValsh, UPLO};

/// Sample covariance of the columns of `x` (denominator `n - 1`).
pub fn covariance(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let Some(mean) = x.mean_axis(Axis(0)) else {
        return Array2::zeros((x.ncols(), x.ncols()));
    };
    let centered = x - &mean;
    let denom = (n.max(2) - 1) as f64;
    centered.t().dot(&centered) / denom
}

/// Eigenvalues of a symmetric matrix, sorted in descending order.
pub fn symmetric_eigenvalues(matrix: &Array2<f64>) -> Result<Vec<f64>, LinalgError> {
    if matrix.is_empty() {
        return Ok(Vec::new());
    }
    let mut eigenvalues = matrix.eigvalsh(UPLO::Lower)?.to_vec();
    eigenvalues.sort_by(|a, b| b.total_cmp(a));
    Ok(eigenvalues)
}

/// Number of leading components whose cumulative explained variance first
/// exceeds `ratio`. Returns 0 for data without variance.
pub fn components_for_variance(x: &Array2<f64>, ratio: f64) -> Result<usize, LinalgError> {
    let eigenvalues: Vec<f64> = symmetric_eigenvalues(&covariance(x))?
        .into_iter()
        .map(|v| v.max(0.0))
        .collect();
    let total: f64 = eigenvalues.iter().sum();
    if total <= 0.0 {
        return Ok(0);
    }
    let mut cumulative = 0.0;
    for (k, value) in eigenvalues.iter().enumerate() {
        cumulative += value / total;
        if cumulative > ratio {
            return Ok(k + 1);
        }
    }
    Ok(eigenvalues.len())
}
