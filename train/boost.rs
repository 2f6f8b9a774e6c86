use ndarray::{Array1, Array2, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use super::progress::{TrainProgressObserver, TrainStage};
use super::tree::{RegressionTree, TreeParams, sample_features};

// Progress is reported every this many rounds.
const ROUNDS_PER_UPDATE: usize = 10;

#[derive(Debug, Clone)]
pub struct BoostParams {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub row_subsample: f64,
    pub column_subsample: f64,
    pub l2: f64,
    pub seed: u64,
}

/// Squared-loss gradient boosting: a constant start plus shrunken trees
/// fitted to the running residuals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoostedModel {
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

pub fn fit_boosting(
    x: &Array2<f64>,
    y: &Array1<f64>,
    params: &BoostParams,
    progress: &mut dyn TrainProgressObserver,
) -> BoostedModel {
    let n = x.nrows();
    let base_score = y.mean().unwrap_or(0.0);
    let mut prediction = Array1::from_elem(n, base_score);
    let mut rng = StdRng::seed_from_u64(params.seed);
    let tree_params = TreeParams {
        max_depth: Some(params.max_depth),
        l2: params.l2,
        ..TreeParams::default()
    };
    let n_rows = ((n as f64 * params.row_subsample).ceil() as usize).clamp(1, n.max(1));

    let mut trees = Vec::with_capacity(params.rounds);
    progress.on_stage_start(TrainStage::BoostingRounds, params.rounds);
    for round in 0..params.rounds {
        let residuals: Vec<f64> = y.iter().zip(prediction.iter()).map(|(t, p)| t - p).collect();
        let mut rows = if n_rows < n {
            index::sample(&mut rng, n, n_rows).into_vec()
        } else {
            (0..n).collect()
        };
        rows.sort_unstable();
        let features = sample_features(x.ncols(), params.column_subsample, &mut rng);

        let fit = RegressionTree::fit(x.view(), &residuals, rows, &features, &tree_params);
        for (p, row) in prediction.iter_mut().zip(x.rows()) {
            let step = match row.as_slice() {
                Some(slice) => fit.tree.predict_row(slice),
                None => fit.tree.predict_row(&row.to_vec()),
            };
            *p += params.learning_rate * step;
        }
        trees.push(fit.tree);

        if (round + 1) % ROUNDS_PER_UPDATE == 0 || round + 1 == params.rounds {
            progress.on_stage_advance(TrainStage::BoostingRounds, round + 1);
        }
    }
    progress.on_stage_finish(TrainStage::BoostingRounds);

    let train_mse = y
        .iter()
        .zip(prediction.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / n.max(1) as f64;
    log::debug!(
        "Fitted {} boosting rounds; training RMSE {:.4}",
        trees.len(),
        train_mse.sqrt()
    );

    BoostedModel {
        base_score,
        learning_rate: params.learning_rate,
        trees,
    }
}

impl BoostedModel {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let mut out = Array1::from_elem(x.nrows(), self.base_score);
        for tree in &self.trees {
            out.scaled_add(self.learning_rate, &tree.predict(x));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::progress::NoopTrainProgress;
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;

    fn params(rounds: usize) -> BoostParams {
        BoostParams {
            rounds,
            learning_rate: 0.1,
            max_depth: 3,
            row_subsample: 0.8,
            column_subsample: 0.8,
            l2: 1.0,
            seed: 42,
        }
    }

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 4), |(i, j)| ((i * (2 * j + 1)) % 23) as f64 / 23.0);
        let y = x.map_axis(Axis(1), |r| 4.0 * r[0] + 2.0 * r[1] * r[1]);
        (x, y)
    }

    #[test]
    fn zero_rounds_predict_the_mean() {
        let (x, y) = data();
        let model = fit_boosting(&x, &y, &params(0), &mut NoopTrainProgress);
        assert_abs_diff_eq!(model.predict_row(&[0.0; 4]), y.mean().unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn more_rounds_reduce_training_error() {
        let (x, y) = data();
        let mse = |rounds| {
            let model = fit_boosting(&x, &y, &params(rounds), &mut NoopTrainProgress);
            let p = model.predict(x.view());
            (&p - &y).mapv(|r| r * r).mean().unwrap()
        };
        let short = mse(5);
        let long = mse(100);
        assert!(long < short * 0.5, "long={long} short={short}");
    }

    #[test]
    fn row_and_matrix_prediction_agree() {
        let (x, y) = data();
        let model = fit_boosting(&x, &y, &params(20), &mut NoopTrainProgress);
        let all = model.predict(x.view());
        let row = x.row(7).to_vec();
        assert_abs_diff_eq!(model.predict_row(&row), all[7], epsilon = 1e-12);
    }
}
