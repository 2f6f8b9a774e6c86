//! # Model Data Loading
//!
//! Converts a per-target CSV (or an in-memory `Table`) into the dense
//! `ndarray` structures the estimators consume. The target column is
//! required; every other numeric column becomes a feature, in file order.
//! Text columns such as county names are skipped.

use ndarray::{Array1, Array2};
use std::path::Path;

use crate::pipeline::table::{self, DataError, Table};

/// The minimum number of usable rows needed to split, cross-validate and fit.
pub const MIN_MODEL_ROWS: usize = 10;

/// A container for validated data ready for model training.
#[derive(Debug, Clone)]
pub struct ModelData {
    /// Shape: [n_samples, n_features].
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub feature_names: Vec<String>,
}

impl ModelData {
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    /// Builds model data from a table. Rows with a null target are dropped and
    /// remaining feature nulls are replaced by the column mean.
    pub fn from_table(table: &Table, target: &str) -> Result<Self, DataError> {
        let target_values = table.numeric(target)?;
        let keep: Vec<usize> = target_values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|_| i))
            .collect();
        if keep.len() < MIN_MODEL_ROWS {
            return Err(DataError::InsufficientRows {
                found: keep.len(),
                required: MIN_MODEL_ROWS,
            });
        }

        let feature_names: Vec<String> = table
            .numeric_names()
            .into_iter()
            .filter(|&n| n != target)
            .map(str::to_string)
            .collect();
        if feature_names.is_empty() {
            return Err(DataError::NoFeatureColumns(target.to_string()));
        }

        let y: Array1<f64> = keep.iter().filter_map(|&i| target_values[i]).collect();
        if y.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(target.to_string()));
        }

        let mut x = Array2::<f64>::zeros((keep.len(), feature_names.len()));
        for (j, name) in feature_names.iter().enumerate() {
            let column = table.numeric(name)?;
            let values: Vec<Option<f64>> = keep.iter().map(|&i| column[i]).collect();
            // An all-null column has no mean; it becomes a constant zero.
            let fill = table::mean(&values).unwrap_or(0.0);
            for (row, value) in values.iter().enumerate() {
                let v = value.unwrap_or(fill);
                if !v.is_finite() {
                    return Err(DataError::NonFiniteValuesFound(name.clone()));
                }
                x[[row, j]] = v;
            }
        }

        Ok(Self {
            x,
            y,
            feature_names,
        })
    }
}

/// Reads a per-target model data file from disk.
pub fn load_model_data(path: &Path, target: &str) -> Result<ModelData, DataError> {
    let table = Table::read_csv(path)?;
    let data = ModelData::from_table(&table, target)?;
    log::info!(
        "Loaded model data for '{}' from {}: {} samples x {} features",
        target,
        path.display(),
        data.n_samples(),
        data.feature_names.len()
    );
    Ok(data)
}
