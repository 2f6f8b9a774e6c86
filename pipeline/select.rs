//! # Feature Selection and Model Data Preparation
//!
//! Selection runs in two passes per target. A Pearson filter keeps the
//! numeric columns with `|r| > threshold`; a cross-validated Lasso over the
//! survivors keeps those with a non-zero coefficient. `prepare` then cuts the
//! per-target training files down to the Lasso selection.

use itertools::Itertools;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{PathsConfig, TrainingConfig};
use crate::pipeline::table::{DataError, Table};
use crate::proxy::{Scenario, Target};
use crate::step::StepTimer;
use crate::train::data::ModelData;
use crate::train::estimate::TrainError;
use crate::train::lasso::LassoCv;
use crate::train::progress::NoopTrainProgress;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Lasso selection failed: {0}")]
    Train(#[from] TrainError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Selected feature file '{0}' was not found; run feature selection first.")]
    MissingSelection(String),
    #[error("None of the features listed in '{0}' exist in the base dataset.")]
    NoValidFeatures(String),
}

/// Pearson correlation over the rows where both values are present. `None`
/// when fewer than two such rows exist or either side has no variance.
pub fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x).powi(2);
        syy += (y - mean_y).powi(2);
    }
    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then_some(r)
}

/// Numeric columns that identify a county rather than describe it.
const IDENTIFIER_COLUMNS: &[&str] = &["countyfips"];

/// Correlation of every numeric column (the target included) with the
/// target, strongest first. Identifiers and undefined correlations are
/// dropped.
pub fn correlations(table: &Table, target: &str) -> Result<Vec<(String, f64)>, DataError> {
    let y = table.numeric(target)?;
    let mut out = Vec::new();
    for name in table
        .numeric_names()
        .into_iter()
        .filter(|name| !IDENTIFIER_COLUMNS.contains(name))
    {
        if let Some(r) = pearson(table.numeric(name)?, y) {
            out.push((name.to_string(), r));
        }
    }
    Ok(out
        .into_iter()
        .sorted_by(|a, b| b.1.abs().total_cmp(&a.1.abs()))
        .collect())
}

/// Names with `|r| > threshold`, in correlation order.
pub fn filter_by_correlation(correlations: &[(String, f64)], threshold: f64) -> Vec<String> {
    correlations
        .iter()
        .filter(|(_, r)| r.abs() > threshold)
        .map(|(name, _)| name.clone())
        .collect()
}

// Written as a JSON object whose keys keep correlation order.
struct OrderedCorrelations<'a>(&'a [(String, f64)]);

impl Serialize for OrderedCorrelations<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, r) in self.0 {
            map.serialize_entry(name, r)?;
        }
        map.end()
    }
}

/// One row of `features_lasso_<short>.csv`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LassoFeature {
    pub feature: String,
    pub coef: f64,
}

/// Fits a cross-validated Lasso of `target` on `candidates` and returns the
/// features with a non-zero coefficient.
pub fn select_by_lasso(
    table: &Table,
    target: &str,
    candidates: &[String],
    config: &TrainingConfig,
) -> Result<Vec<LassoFeature>, SelectionError> {
    let mut columns: Vec<&str> = candidates.iter().map(String::as_str).collect();
    columns.push(target);
    let data = ModelData::from_table(&table.select(&columns)?, target)?;
    let cv = LassoCv {
        n_alphas: config.lasso_alphas,
        folds: config.lasso_folds,
        max_iterations: config.lasso_max_iterations,
        tolerance: config.lasso_tolerance,
    }
    .fit(&data.x, &data.y, &mut NoopTrainProgress)?;
    log::info!("LassoCV for {target} chose alpha={:.6}", cv.alpha);
    Ok(data
        .feature_names
        .into_iter()
        .zip(cv.fit.coefficients.iter().copied())
        .filter(|(_, coef)| *coef != 0.0)
        .map(|(feature, coef)| LassoFeature { feature, coef })
        .collect())
}

/// One row of `feature_selection_summary.csv`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectionSummary {
    pub target: String,
    pub corr_features: usize,
    pub lasso_features: usize,
    pub corr_file: String,
    pub lasso_file: String,
}

pub fn lasso_features_path(paths: &PathsConfig, scenario: Scenario, target: Target) -> PathBuf {
    paths
        .interim_scenario_dir(scenario)
        .join(format!("features_lasso_{}.csv", target.short_name()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Runs both selection passes for every target of a scenario.
pub fn run_selection(
    paths: &PathsConfig,
    config: &TrainingConfig,
    scenario: Scenario,
) -> Result<Vec<SelectionSummary>, SelectionError> {
    let timer = StepTimer::start(format!("Feature Selection - {}", scenario.title()));
    let source = paths.base_table(scenario);
    let mut table = Table::read_csv(&source)?;
    let dropped = table.dedup_columns();
    if !dropped.is_empty() {
        log::warn!("Dropped duplicated columns: {dropped:?}");
    }
    log::info!("Dataset loaded: {} rows x {} columns", table.height(), table.width());

    let out_dir = paths.interim_scenario_dir(scenario);
    fs::create_dir_all(&out_dir)?;

    let mut summary = Vec::new();
    for target in Target::ALL {
        let column = target.column();
        if !table.contains(column) {
            log::warn!("Target {column} is not in {}, skipping.", source.display());
            continue;
        }
        let corr = correlations(&table, column)?;
        let selected = filter_by_correlation(&corr, config.correlation_threshold);
        let corr_path = out_dir.join(format!("features_corr_{column}.json"));
        fs::write(&corr_path, serde_json::to_string_pretty(&OrderedCorrelations(&corr))?)?;
        log::info!(
            "Saved correlations to {} ({} features above {})",
            file_name(&corr_path),
            selected.len(),
            config.correlation_threshold
        );

        let candidates: Vec<String> = selected.iter().filter(|n| *n != column).cloned().collect();
        if candidates.is_empty() {
            log::warn!("Not enough correlated columns to run Lasso for {column}.");
            continue;
        }
        let lasso = match select_by_lasso(&table, column, &candidates, config) {
            Ok(features) => features,
            Err(e) => {
                log::error!("Lasso selection failed for {column}: {e}");
                continue;
            }
        };

        let lasso_path = lasso_features_path(paths, scenario, target);
        let mut writer = csv::Writer::from_path(&lasso_path)?;
        for row in &lasso {
            writer.serialize(row)?;
        }
        writer.flush()?;
        log::info!("Saved Lasso features to {} ({} features)", file_name(&lasso_path), lasso.len());

        summary.push(SelectionSummary {
            target: column.to_string(),
            corr_features: selected.len(),
            lasso_features: lasso.len(),
            corr_file: file_name(&corr_path),
            lasso_file: file_name(&lasso_path),
        });
    }

    let summary_path = out_dir.join("feature_selection_summary.csv");
    let mut writer = csv::Writer::from_path(&summary_path)?;
    for row in &summary {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!("Selection summary saved to {}", summary_path.display());
    timer.finish();
    Ok(summary)
}

/// One row of `model_data_summary.csv`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreparedSummary {
    pub target: String,
    pub rows: usize,
    pub cols: usize,
}

/// Builds the training table of one target: its selected features that exist
/// in `base`, then the target, without rows whose target is missing.
pub fn prepare_table(base: &Table, target: &str, selected: &[String], source: &str) -> Result<Table, SelectionError> {
    let mut columns: Vec<&str> = selected
        .iter()
        .map(String::as_str)
        .filter(|&f| f != target && base.contains(f))
        .collect();
    if columns.is_empty() {
        return Err(SelectionError::NoValidFeatures(source.to_string()));
    }
    if columns.len() < selected.len() {
        log::warn!(
            "{} of {} selected features are missing from the base dataset",
            selected.len() - columns.len(),
            selected.len()
        );
    }
    columns.push(target);
    Ok(base.select(&columns)?.drop_null_rows(&[target])?)
}

pub fn read_lasso_features(path: &Path) -> Result<Vec<String>, SelectionError> {
    if !path.exists() {
        return Err(SelectionError::MissingSelection(path.display().to_string()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut features = Vec::new();
    for row in reader.deserialize::<LassoFeature>() {
        features.push(row?.feature);
    }
    Ok(features)
}

/// Writes `model_data_<target>.csv` for every target of a scenario.
pub fn run_prepare(paths: &PathsConfig, scenario: Scenario) -> Result<Vec<PreparedSummary>, SelectionError> {
    let timer = StepTimer::start(format!("Prepare Model Data - {}", scenario.title()));
    let mut base = Table::read_csv(&paths.base_table(scenario))?;
    base.dedup_columns();

    let mut summary = Vec::new();
    for target in Target::ALL {
        let features_path = lasso_features_path(paths, scenario, target);
        let selected = read_lasso_features(&features_path)?;
        let prepared = prepare_table(&base, target.column(), &selected, &file_name(&features_path))?;
        prepared.write_csv(&paths.model_data(scenario, target))?;
        summary.push(PreparedSummary {
            target: target.column().to_string(),
            rows: prepared.height(),
            cols: prepared.width(),
        });
    }

    let summary_path = paths.processed_scenario_dir(scenario).join("model_data_summary.csv");
    let mut writer = csv::Writer::from_path(&summary_path)?;
    for row in &summary {
        writer.serialize(row)?;
    }
    writer.flush()?;
    timer.finish();
    Ok(summary)
}
