use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Held-out regression metrics, rounded to four decimals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Coefficient of determination, root mean squared error and mean absolute
/// error. A constant `y_true` scores R2 = 1 for a perfect fit and 0 otherwise.
pub fn evaluate(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Metrics {
    let n = y_true.len().max(1) as f64;
    let mean = y_true.mean().unwrap_or(0.0);
    let (mut ss_res, mut ss_tot, mut abs_sum) = (0.0, 0.0, 0.0);
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        let residual = t - p;
        ss_res += residual * residual;
        ss_tot += (t - mean) * (t - mean);
        abs_sum += residual.abs();
    }
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    Metrics {
        r2: round4(r2),
        rmse: round4((ss_res / n).sqrt()),
        mae: round4(abs_sum / n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn perfect_prediction() {
        let y = array![1.0, 2.0, 3.0];
        let m = evaluate(y.view(), y.view());
        assert_eq!(m, Metrics { r2: 1.0, rmse: 0.0, mae: 0.0 });
    }

    #[test]
    fn known_errors_are_rounded() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let p = array![1.5, 2.0, 2.0, 4.0];
        let m = evaluate(y.view(), p.view());
        // ss_res = 1.25, ss_tot = 5
        assert_eq!(m.r2, 0.75);
        assert_eq!(m.rmse, round4((1.25f64 / 4.0).sqrt()));
        assert_eq!(m.mae, 0.375);
        assert_eq!(round4(0.123_456), 0.1235);
    }

    #[test]
    fn constant_target_scores_zero_unless_exact() {
        let y = array![2.0, 2.0];
        assert_eq!(evaluate(y.view(), array![2.0, 3.0].view()).r2, 0.0);
    }
}
