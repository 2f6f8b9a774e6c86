//! # L1-Penalized Linear Regression
//!
//! Minimizes `(1 / 2n) * ||y - Xw - b||^2 + alpha * ||w||_1` by cyclic
//! coordinate descent on centered data. `LassoCv` walks a log-spaced alpha
//! path from `alpha_max` (the smallest alpha that zeroes every coefficient)
//! down to `alpha_max * 1e-3`, warm-starting each fit from the previous one,
//! and scores the path on contiguous validation folds.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::estimate::TrainError;
use super::progress::{TrainProgressObserver, TrainStage};
use super::scaler::StandardScaler;

/// Ratio between the smallest and largest alpha on the path.
const ALPHA_PATH_EPS: f64 = 1e-3;

/// Coefficients of a single Lasso fit, in the original feature scale.
#[derive(Debug, Clone, PartialEq)]
pub struct LassoFit {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl LassoFit {
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }
}

struct Centered {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Array1<f64>,
    y_mean: f64,
}

fn center(x: &Array2<f64>, y: &Array1<f64>) -> Centered {
    let x_mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let y_mean = y.mean().unwrap_or(0.0);
    Centered {
        x: x - &x_mean,
        y: y - y_mean,
        x_mean,
        y_mean,
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Smallest alpha for which every coefficient is zero.
pub fn alpha_max(x: &Array2<f64>, y: &Array1<f64>) -> f64 {
    let c = center(x, y);
    let n = x.nrows().max(1) as f64;
    c.x.t()
        .dot(&c.y)
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        / n
}

/// Log-spaced alphas from `alpha_max` down to `alpha_max * 1e-3`.
pub fn alpha_grid(alpha_max: f64, n_alphas: usize) -> Vec<f64> {
    if n_alphas <= 1 {
        return vec![alpha_max];
    }
    let (hi, lo) = (alpha_max.ln(), (alpha_max * ALPHA_PATH_EPS).ln());
    (0..n_alphas)
        .map(|i| (hi + (lo - hi) * i as f64 / (n_alphas - 1) as f64).exp())
        .collect()
}

/// Coordinate descent from `warm_start` (or zeros). Stops when the largest
/// coefficient update is below `tolerance` times the largest coefficient.
pub fn fit_lasso(
    x: &Array2<f64>,
    y: &Array1<f64>,
    alpha: f64,
    max_iterations: usize,
    tolerance: f64,
    warm_start: Option<&Array1<f64>>,
) -> LassoFit {
    let c = center(x, y);
    let (n, p) = c.x.dim();
    let n_alpha = n as f64 * alpha;
    let norms: Vec<f64> = c
        .x
        .axis_iter(Axis(1))
        .map(|col| col.dot(&col))
        .collect();

    let mut w = warm_start
        .filter(|w| w.len() == p)
        .cloned()
        .unwrap_or_else(|| Array1::zeros(p));
    let mut residual = &c.y - &c.x.dot(&w);

    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        iterations += 1;
        let mut max_delta = 0.0_f64;
        let mut max_weight = 0.0_f64;
        for j in 0..p {
            let column: ArrayView1<f64> = c.x.column(j);
            let old = w[j];
            let updated = if norms[j] > 0.0 {
                let rho = column.dot(&residual) + norms[j] * old;
                soft_threshold(rho, n_alpha) / norms[j]
            } else {
                0.0
            };
            if updated != old {
                residual.scaled_add(old - updated, &column);
                w[j] = updated;
            }
            max_delta = max_delta.max((updated - old).abs());
            max_weight = max_weight.max(updated.abs());
        }
        if max_weight == 0.0 || max_delta <= tolerance * max_weight {
            converged = true;
            break;
        }
    }

    let intercept = c.y_mean - c.x_mean.dot(&w);
    LassoFit {
        coefficients: w,
        intercept,
        iterations,
        converged,
    }
}

/// Cross-validated choice of alpha.
#[derive(Debug, Clone)]
pub struct LassoCv {
    pub n_alphas: usize,
    pub folds: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone)]
pub struct LassoCvFit {
    pub alpha: f64,
    pub alphas: Vec<f64>,
    /// Mean validation MSE per alpha, aligned with `alphas`.
    pub mse_path: Vec<f64>,
    pub fit: LassoFit,
}

/// Contiguous fold boundaries; the first `n % k` folds get one extra row.
fn fold_ranges(n: usize, k: usize) -> Vec<std::ops::Range<usize>> {
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    (0..k)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

impl LassoCv {
    pub fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        progress: &mut dyn TrainProgressObserver,
    ) -> Result<LassoCvFit, TrainError> {
        let n = x.nrows();
        if n < self.folds {
            return Err(TrainError::NotEnoughRows {
                found: n,
                required: self.folds,
            });
        }
        let top = alpha_max(x, y);
        if !(top > 0.0 && top.is_finite()) {
            return Err(TrainError::DegenerateTarget(
                "no feature is correlated with the target; the Lasso path is empty".to_string(),
            ));
        }
        let alphas = alpha_grid(top, self.n_alphas);
        let mut mse_sum = vec![0.0; alphas.len()];

        progress.on_stage_start(TrainStage::LassoPath, self.folds);
        for (k, range) in fold_ranges(n, self.folds).into_iter().enumerate() {
            let train_rows: Vec<usize> = (0..n).filter(|i| !range.contains(i)).collect();
            let valid_rows: Vec<usize> = range.collect();
            let x_train = x.select(Axis(0), &train_rows);
            let y_train = y.select(Axis(0), &train_rows);
            let x_valid = x.select(Axis(0), &valid_rows);
            let y_valid = y.select(Axis(0), &valid_rows);

            let mut warm: Option<Array1<f64>> = None;
            for (slot, &alpha) in mse_sum.iter_mut().zip(&alphas) {
                let fit = fit_lasso(
                    &x_train,
                    &y_train,
                    alpha,
                    self.max_iterations,
                    self.tolerance,
                    warm.as_ref(),
                );
                let residual = &y_valid - &fit.predict(&x_valid);
                *slot += residual.mapv(|r| r * r).mean().unwrap_or(0.0);
                warm = Some(fit.coefficients);
            }
            progress.on_stage_advance(TrainStage::LassoPath, k + 1);
        }
        progress.on_stage_finish(TrainStage::LassoPath);

        let mse_path: Vec<f64> = mse_sum.iter().map(|s| s / self.folds as f64).collect();
        let best = mse_path
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i);
        let alpha = alphas[best];

        let fit = fit_lasso(x, y, alpha, self.max_iterations, self.tolerance, None);
        if !fit.converged {
            log::warn!(
                "Lasso refit at alpha={alpha:.6} stopped after {} iterations without converging",
                fit.iterations
            );
        }
        log::debug!(
            "LassoCV chose alpha={alpha:.6} ({} of {} non-zero coefficients)",
            fit.coefficients.iter().filter(|&&c| c != 0.0).count(),
            fit.coefficients.len()
        );
        Ok(LassoCvFit {
            alpha,
            alphas,
            mse_path,
            fit,
        })
    }
}

/// A serialized Lasso estimator: standardization plus the fitted line in
/// standardized space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearModel {
    pub alpha: f64,
    pub scaler: StandardScaler,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    pub fn from_fit(scaler: StandardScaler, cv: &LassoCvFit) -> Self {
        Self {
            alpha: cv.alpha,
            scaler,
            coefficients: cv.fit.coefficients.to_vec(),
            intercept: cv.fit.intercept,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let scaled = self.scaler.transform_row(row);
        self.intercept
            + scaled
                .iter()
                .zip(&self.coefficients)
                .map(|(x, w)| x * w)
                .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::progress::NoopTrainProgress;
    use crate::train::progress::recording::RecordingProgress;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, 4), |_| rng.gen_range(-1.0..1.0));
        let y = x.map_axis(Axis(1), |row| 3.0 * row[0] - 2.0 * row[1] + 5.0);
        (x, y)
    }

    #[test]
    fn alpha_max_zeroes_every_coefficient() {
        let (x, y) = synthetic(60, 1);
        let top = alpha_max(&x, &y);
        let fit = fit_lasso(&x, &y, top * 1.0001, 1000, 1e-8, None);
        assert!(fit.coefficients.iter().all(|&c| c == 0.0));
        assert_abs_diff_eq!(fit.intercept, y.mean().unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn small_alpha_recovers_linear_signal() {
        let (x, y) = synthetic(80, 2);
        let fit = fit_lasso(&x, &y, 1e-6, 10_000, 1e-10, None);
        assert!(fit.converged);
        assert_abs_diff_eq!(fit.coefficients[0], 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(fit.coefficients[1], -2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(fit.coefficients[2], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(fit.intercept, 5.0, epsilon = 1e-3);
    }

    #[test]
    fn grid_is_log_spaced_and_descending() {
        let grid = alpha_grid(10.0, 3);
        assert_abs_diff_eq!(grid[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[1], 10.0 * 10f64.powf(-1.5), epsilon = 1e-12);
        assert_abs_diff_eq!(grid[2], 0.01, epsilon = 1e-12);
    }

    #[test]
    fn folds_cover_rows_contiguously() {
        let folds = fold_ranges(12, 5);
        assert_eq!(folds, vec![0..3, 3..6, 6..8, 8..10, 10..12]);
    }

    #[test]
    fn cross_validation_keeps_signal_features() {
        let (x, y) = synthetic(100, 3);
        let cv = LassoCv {
            n_alphas: 30,
            folds: 5,
            max_iterations: 10_000,
            tolerance: 1e-6,
        };
        let mut progress = RecordingProgress::default();
        let result = cv.fit(&x, &y, &mut progress).unwrap();
        assert_eq!(result.mse_path.len(), 30);
        assert!(result.fit.coefficients[0] > 2.5);
        assert!(result.fit.coefficients[1] < -1.5);
        assert_eq!(progress.events.first(), Some(&(TrainStage::LassoPath, "start", 5)));
        assert_eq!(progress.events.last(), Some(&(TrainStage::LassoPath, "finish", 0)));
    }

    #[test]
    fn constant_target_is_degenerate() {
        let (x, _) = synthetic(20, 4);
        let y = Array1::from_elem(20, 7.0);
        let cv = LassoCv {
            n_alphas: 10,
            folds: 5,
            max_iterations: 100,
            tolerance: 1e-4,
        };
        assert!(matches!(
            cv.fit(&x, &y, &mut NoopTrainProgress),
            Err(TrainError::DegenerateTarget(_))
        ));
    }

    #[test]
    fn linear_model_predicts_in_raw_units() {
        let (x, y) = synthetic(80, 5);
        let scaler = StandardScaler::fit(&x);
        let cv = LassoCv {
            n_alphas: 20,
            folds: 4,
            max_iterations: 10_000,
            tolerance: 1e-8,
        };
        let fit = cv.fit(&scaler.transform(&x), &y, &mut NoopTrainProgress).unwrap();
        let model = LinearModel::from_fit(scaler, &fit);
        let row = x.row(0).to_vec();
        assert_abs_diff_eq!(model.predict_row(&row), y[0], epsilon = 0.05);
    }
}
