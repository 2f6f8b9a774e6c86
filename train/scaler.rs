use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column centering and scaling fitted on training rows only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Population standard deviation; constant columns get 1 so they map to 0.
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mean: Array1<f64> = x.sum_axis(Axis(0)) / n;
        let scale = x
            .axis_iter(Axis(1))
            .zip(mean.iter())
            .map(|(column, &m)| {
                let var = column.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > 0.0 && sd.is_finite() { sd } else { 1.0 }
            })
            .collect();
        Self {
            mean: mean.to_vec(),
            scale,
        }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (mut column, (m, s)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(&self.scale))
        {
            column.mapv_inplace(|v| (v - m) / s);
        }
        out
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}
