use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..n` with a seeded generator and holds out the first
/// `ceil(n * test_fraction)` indices. At least one row stays on each side
/// whenever `n >= 2`.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> SplitIndices {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut n_test = (n as f64 * test_fraction).ceil() as usize;
    if n >= 2 {
        n_test = n_test.clamp(1, n - 1);
    } else {
        n_test = 0;
    }
    let train = indices.split_off(n_test);
    SplitIndices {
        train,
        test: indices,
    }
}

/// Gathers the given rows of a design matrix and response.
pub fn take(x: &Array2<f64>, y: &Array1<f64>, rows: &[usize]) -> (Array2<f64>, Array1<f64>) {
    (x.select(Axis(0), rows), y.select(Axis(0), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn partitions_every_row_once() {
        let split = train_test_split(101, 0.2, 42);
        assert_eq!(split.test.len(), 21);
        assert_eq!(split.train.len(), 80);
        let all: HashSet<usize> = split.train.iter().chain(&split.test).copied().collect();
        assert_eq!(all.len(), 101);
    }

    #[test]
    fn same_seed_same_split() {
        assert_eq!(train_test_split(50, 0.2, 7), train_test_split(50, 0.2, 7));
        assert_ne!(train_test_split(50, 0.2, 7), train_test_split(50, 0.2, 8));
    }

    #[test]
    fn tiny_inputs_keep_a_training_row() {
        let split = train_test_split(2, 0.9, 1);
        assert_eq!(split.train.len(), 1);
        assert_eq!(split.test.len(), 1);
    }
}
