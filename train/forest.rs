use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::progress::{TrainProgressObserver, TrainStage};
use super::tree::{RegressionTree, TreeFit, TreeParams};

// Trees are fitted in parallel batches of this size between progress updates.
const TREES_PER_BATCH: usize = 16;

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

/// Bootstrap-aggregated regression trees. Every split considers all features.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForestModel {
    pub trees: Vec<RegressionTree>,
    /// Mean of the per-tree normalized impurity decreases; sums to 1.
    pub importances: Vec<f64>,
}

/// Seed of the `index`-th tree, derived from the forest seed.
fn tree_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(index as u64)
}

fn fit_one(x: ArrayView2<f64>, y: &[f64], params: &ForestParams, index: usize) -> TreeFit {
    let n = x.nrows();
    let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, index));
    let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
    let features: Vec<usize> = (0..x.ncols()).collect();
    let tree_params = TreeParams {
        max_depth: params.max_depth,
        min_samples_leaf: params.min_samples_leaf,
        ..TreeParams::default()
    };
    RegressionTree::fit(x, y, rows, &features, &tree_params)
}

fn normalized(mut values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
    values
}

pub fn fit_forest(
    x: &Array2<f64>,
    y: &Array1<f64>,
    params: &ForestParams,
    progress: &mut dyn TrainProgressObserver,
) -> ForestModel {
    let targets = y.to_vec();
    let view = x.view();
    let mut trees = Vec::with_capacity(params.n_trees);
    let mut importances = vec![0.0; x.ncols()];

    progress.on_stage_start(TrainStage::ForestTrees, params.n_trees);
    let mut start = 0;
    while start < params.n_trees {
        let end = (start + TREES_PER_BATCH).min(params.n_trees);
        let batch: Vec<TreeFit> = (start..end)
            .into_par_iter()
            .map(|index| fit_one(view, &targets, params, index))
            .collect();
        for fit in batch {
            for (total, value) in importances.iter_mut().zip(normalized(fit.importances)) {
                *total += value;
            }
            trees.push(fit.tree);
        }
        start = end;
        progress.on_stage_advance(TrainStage::ForestTrees, start);
    }
    progress.on_stage_finish(TrainStage::ForestTrees);

    log::debug!("Fitted random forest with {} trees", trees.len());
    ForestModel {
        trees,
        importances: normalized(importances),
    }
}

impl ForestModel {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|r| r.to_vec()).collect();
        rows.par_iter().map(|row| self.predict_row(row)).collect::<Vec<_>>().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::progress::NoopTrainProgress;
    use crate::train::progress::recording::RecordingProgress;
    use approx::assert_abs_diff_eq;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| ((i * (j + 3)) % 17) as f64);
        let y = x.map_axis(ndarray::Axis(1), |r| if r[0] > 8.0 { 10.0 } else { 0.0 });
        (x, y)
    }

    fn params(n_trees: usize) -> ForestParams {
        ForestParams {
            n_trees,
            max_depth: None,
            min_samples_leaf: 1,
            seed: 42,
        }
    }

    #[test]
    fn importances_concentrate_on_the_signal_feature() {
        let (x, y) = data();
        let forest = fit_forest(&x, &y, &params(20), &mut NoopTrainProgress);
        assert_eq!(forest.trees.len(), 20);
        assert_abs_diff_eq!(forest.importances.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(forest.importances[0] > 0.5);
    }

    #[test]
    fn predictions_follow_the_step() {
        let (x, y) = data();
        let forest = fit_forest(&x, &y, &params(30), &mut NoopTrainProgress);
        let predictions = forest.predict(x.view());
        let errors = predictions
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| (*p - *t).abs() > 5.0)
            .count();
        assert_eq!(errors, 0);
    }

    #[test]
    fn same_seed_is_reproducible_and_progress_is_batched() {
        let (x, y) = data();
        let mut progress = RecordingProgress::default();
        let a = fit_forest(&x, &y, &params(20), &mut progress);
        let b = fit_forest(&x, &y, &params(20), &mut NoopTrainProgress);
        assert_eq!(a, b);
        let advances: Vec<usize> = progress
            .events
            .iter()
            .filter(|e| e.1 == "advance")
            .map(|e| e.2)
            .collect();
        assert_eq!(advances, vec![16, 20]);
    }
}
