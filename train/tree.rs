//! # Regression Trees
//!
//! Greedy CART on squared error. Every node stores the sum of its targets
//! and a split is scored by
//!
//! `gain = SL^2 / (nL + l2) + SR^2 / (nR + l2) - S^2 / (n + l2)`
//!
//! which with `l2 = 0` is exactly the reduction in squared error, and with
//! `l2 > 0` is the second-order boosting gain for squared loss. Leaves hold
//! `S / (n + l2)`. Thresholds sit halfway between adjacent distinct values
//! and rows with `x <= threshold` go left.
//!
//! Nodes are stored flat; children are indices into the same vector, so a
//! tree serializes as a plain array of tables.

use ndarray::{Array1, ArrayView2};
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

// Splits must improve the objective by more than this.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    pub feature: u32,
    pub threshold: f64,
    pub left: u32,
    pub right: u32,
    pub value: f64,
    pub leaf: bool,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            leaf: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
    pub l2: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_leaf: 1,
            min_samples_split: 2,
            l2: 0.0,
        }
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Pending {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

/// A fitted tree plus the total gain each feature contributed.
pub struct TreeFit {
    pub tree: RegressionTree,
    pub importances: Vec<f64>,
}

/// Picks `ceil(fraction * n_features)` distinct feature indices, sorted.
pub fn sample_features<R: Rng>(n_features: usize, fraction: f64, rng: &mut R) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n_features).collect();
    }
    let amount = ((n_features as f64 * fraction).ceil() as usize).clamp(1, n_features.max(1));
    let mut picked = index::sample(rng, n_features, amount.min(n_features)).into_vec();
    picked.sort_unstable();
    picked
}

impl RegressionTree {
    /// Grows a tree on `rows` of `x` (duplicates allowed, as in a bootstrap
    /// sample), considering only `features` as split candidates.
    pub fn fit(
        x: ArrayView2<f64>,
        targets: &[f64],
        rows: Vec<usize>,
        features: &[usize],
        params: &TreeParams,
    ) -> TreeFit {
        let mut importances = vec![0.0; x.ncols()];
        let mut nodes = vec![TreeNode::leaf(0.0)];
        let mut stack = vec![Pending {
            node: 0,
            rows,
            depth: 0,
        }];

        while let Some(Pending { node, rows, depth }) = stack.pop() {
            let total: f64 = rows.iter().map(|&i| targets[i]).sum();
            let value = total / (rows.len() as f64 + params.l2);
            nodes[node] = TreeNode::leaf(value);

            let depth_left = params.max_depth.is_none_or(|max| depth < max);
            let min_split = params.min_samples_split.max(2 * params.min_samples_leaf);
            if !depth_left || rows.len() < min_split {
                continue;
            }
            let Some(split) = best_split(x, targets, &rows, features, params, total) else {
                continue;
            };

            importances[split.feature] += split.gain;
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&i| x[[i, split.feature]] <= split.threshold);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(TreeNode::leaf(0.0));
            nodes.push(TreeNode::leaf(0.0));
            nodes[node] = TreeNode {
                feature: split.feature as u32,
                threshold: split.threshold,
                left: left as u32,
                right: right as u32,
                value,
                leaf: false,
            };
            stack.push(Pending {
                node: right,
                rows: right_rows,
                depth: depth + 1,
            });
            stack.push(Pending {
                node: left,
                rows: left_rows,
                depth: depth + 1,
            });
        }

        TreeFit {
            tree: RegressionTree { nodes },
            importances,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut index = 0usize;
        loop {
            let Some(node) = self.nodes.get(index) else {
                return 0.0;
            };
            if node.leaf {
                return node.value;
            }
            let goes_left = row
                .get(node.feature as usize)
                .is_some_and(|&v| v <= node.threshold);
            let next = if goes_left { node.left } else { node.right };
            index = next as usize;
        }
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.rows()
            .into_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict_row(slice),
                None => self.predict_row(&row.to_vec()),
            })
            .collect()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], index: usize) -> usize {
            match nodes.get(index) {
                Some(node) if !node.leaf => {
                    1 + walk(nodes, node.left as usize).max(walk(nodes, node.right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

fn best_split(
    x: ArrayView2<f64>,
    targets: &[f64],
    rows: &[usize],
    features: &[usize],
    params: &TreeParams,
    total: f64,
) -> Option<Split> {
    let n = rows.len();
    let l2 = params.l2;
    let parent_score = total * total / (n as f64 + l2);
    let mut order = rows.to_vec();
    let mut best: Option<Split> = None;

    for &feature in features {
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
        let mut left_sum = 0.0;
        for k in 0..n - 1 {
            left_sum += targets[order[k]];
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }
            let lo = x[[order[k], feature]];
            let hi = x[[order[k + 1], feature]];
            if hi <= lo {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / (n_left as f64 + l2)
                + right_sum * right_sum / (n_right as f64 + l2)
                - parent_score;
            if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.gain) {
                let mid = lo + (hi - lo) / 2.0;
                let threshold = if mid < hi { mid } else { lo };
                best = Some(Split {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn step_function_is_split_at_midpoint() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = [0.0, 0.0, 10.0, 10.0];
        let fit = RegressionTree::fit(x.view(), &y, (0..4).collect(), &[0], &TreeParams::default());
        let root = fit.tree.nodes[0];
        assert!(!root.leaf);
        assert_eq!(root.threshold, 2.5);
        assert_eq!(fit.tree.predict_row(&[1.5]), 0.0);
        assert_eq!(fit.tree.predict_row(&[3.5]), 10.0);
        // Squared error drops from 100 to 0.
        assert_abs_diff_eq!(fit.importances[0], 100.0, epsilon = 1e-9);
    }

    #[test]
    fn l2_shrinks_leaf_values() {
        let x = array![[1.0], [1.0]];
        let y = [4.0, 4.0];
        let params = TreeParams {
            l2: 2.0,
            ..TreeParams::default()
        };
        let fit = RegressionTree::fit(x.view(), &y, vec![0, 1], &[0], &params);
        assert_eq!(fit.tree.nodes.len(), 1);
        assert_eq!(fit.tree.predict_row(&[1.0]), 2.0);
    }

    #[test]
    fn depth_limit_and_leaf_size_are_respected() {
        let x = Array2::from_shape_fn((64, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let params = TreeParams {
            max_depth: Some(3),
            min_samples_leaf: 5,
            ..TreeParams::default()
        };
        let fit = RegressionTree::fit(x.view(), &y, (0..64).collect(), &[0], &params);
        assert!(fit.tree.depth() <= 3);
        assert!(fit.tree.nodes.iter().filter(|n| n.leaf).count() <= 8);
    }

    #[test]
    fn unused_features_are_never_split_on() {
        let x = array![[0.0, 1.0], [0.0, 2.0], [1.0, 3.0], [1.0, 4.0]];
        let y = [1.0, 1.0, 5.0, 5.0];
        let fit = RegressionTree::fit(x.view(), &y, (0..4).collect(), &[1], &TreeParams::default());
        assert!(fit.tree.nodes.iter().filter(|n| !n.leaf).all(|n| n.feature == 1));
        assert_eq!(fit.importances[0], 0.0);
    }

    #[test]
    fn feature_sampling_is_sorted_and_sized() {
        let mut rng = StdRng::seed_from_u64(3);
        let picked = sample_features(10, 0.8, &mut rng);
        assert_eq!(picked.len(), 8);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sample_features(4, 1.0, &mut rng), vec![0, 1, 2, 3]);
    }
}
