//! # Trained Model Artifacts
//!
//! A `TrainedModel` is everything needed to score a feature row after the
//! process that trained it has exited: the outcome and scenario it belongs
//! to, the ordered feature names it was fitted on, the estimator itself and
//! its held-out metrics. Artifacts are stored as human-readable TOML.

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::boost::BoostedModel;
use super::forest::ForestModel;
use super::lasso::LinearModel;
use super::metrics::Metrics;
use crate::expand::ExpandedFeatures;
use crate::proxy::{Scenario, Target};

/// Model family labels as they appear in metric tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Lasso,
    RandomForest,
    GradientBoosting,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::Lasso,
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Lasso => "LassoCV",
            ModelKind::RandomForest => "RandomForest",
            ModelKind::GradientBoosting => "GradientBoosting",
        }
    }

    /// Resolves a metric-table label. Tables written by the earlier
    /// XGBoost-based trainer label the boosted family `XGBoost`.
    pub fn from_label(label: &str) -> Option<ModelKind> {
        match label.trim() {
            "XGBoost" => Some(ModelKind::GradientBoosting),
            other => ModelKind::ALL.into_iter().find(|k| k.label() == other),
        }
    }

    fn file_prefix(self) -> &'static str {
        match self {
            ModelKind::Lasso => "lasso",
            ModelKind::RandomForest => "forest",
            ModelKind::GradientBoosting => "boosted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    Lasso(LinearModel),
    RandomForest(ForestModel),
    GradientBoosting(BoostedModel),
}

impl Estimator {
    pub fn model_kind(&self) -> ModelKind {
        match self {
            Estimator::Lasso(_) => ModelKind::Lasso,
            Estimator::RandomForest(_) => ModelKind::RandomForest,
            Estimator::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            Estimator::Lasso(m) => m.predict_row(row),
            Estimator::RandomForest(m) => m.predict_row(row),
            Estimator::GradientBoosting(m) => m.predict_row(row),
        }
    }
}

/// Custom error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error("The model needs feature '{0}', which the expanded vector does not provide.")]
    MissingFeature(String),
    #[error("Model file names target '{found}', but '{expected}' was requested.")]
    TargetMismatch { found: String, expected: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainedModel {
    pub target: String,
    pub scenario: String,
    pub feature_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    pub estimator: Estimator,
}

/// Where the model of a given family, scenario and target lives.
pub fn artifact_path_for(
    models_dir: &Path,
    kind: ModelKind,
    scenario: Scenario,
    target: Target,
) -> PathBuf {
    models_dir.join(format!(
        "{}_{}_{}.toml",
        kind.file_prefix(),
        scenario.as_str(),
        target.short_name()
    ))
}

/// Where the boosted model served to predictions lives.
pub fn artifact_path(models_dir: &Path, scenario: Scenario, target: Target) -> PathBuf {
    artifact_path_for(models_dir, ModelKind::GradientBoosting, scenario, target)
}

impl TrainedModel {
    /// Scores an expanded feature vector. Features are matched by name, so
    /// the vector may carry extra columns in any order.
    pub fn predict_row(&self, features: &ExpandedFeatures) -> Result<f64, ModelError> {
        let row = self
            .feature_names
            .iter()
            .map(|name| {
                features
                    .get(name)
                    .ok_or_else(|| ModelError::MissingFeature(name.clone()))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(self.estimator.predict_row(&row))
    }

    /// Scores a matrix whose columns follow `feature_names`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.feature_names.len() {
            return Err(ModelError::MismatchedFeatureCount {
                found: x.ncols(),
                expected: self.feature_names.len(),
            });
        }
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.estimator.predict_row(&row.to_vec()))
            .collect())
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a trained model from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }

    /// Loads a model and checks it was trained for `target`.
    pub fn load_for(path: &Path, target: Target) -> Result<Self, ModelError> {
        let model = Self::load(path)?;
        if model.target != target.column() {
            return Err(ModelError::TargetMismatch {
                found: model.target,
                expected: target.column().to_string(),
            });
        }
        Ok(model)
    }
}
