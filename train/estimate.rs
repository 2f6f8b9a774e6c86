//! # Scenario Training
//!
//! For every target with a prepared dataset in a scenario:
//!
//! 1. Seeded train/test split.
//! 2. Standardization fitted on the training rows; the PCA component count
//!    for the configured variance ratio is recorded next to each metric row.
//! 3. Cross-validated Lasso on the standardized data.
//! 4. Random forest and gradient boosting on the raw data.
//! 5. Held-out metrics for all three, forest importances, and the boosted
//!    model artifact the prediction service loads.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::boost::{BoostParams, fit_boosting};
use super::data::{ModelData, load_model_data};
use super::forest::{ForestParams, fit_forest};
use super::lasso::{LassoCv, LinearModel};
use super::metrics::{Metrics, evaluate};
use super::model::{
    Estimator, ModelError, ModelKind, TrainedModel, artifact_path, artifact_path_for,
};
use super::pca::components_for_variance;
use super::progress::TrainProgressObserver;
use super::scaler::StandardScaler;
use super::split::{take, train_test_split};
use crate::config::{PathsConfig, TrainingConfig};
use crate::pipeline::table::DataError;
use crate::proxy::{Scenario, Target};
use crate::step::StepTimer;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Failed to load training data: {0}")]
    Data(#[from] DataError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Training needs at least {required} rows, found {found}.")]
    NotEnoughRows { found: usize, required: usize },
    #[error("Degenerate training target: {0}")]
    DegenerateTarget(String),
    #[error("No model data files were found for scenario '{0}'.")]
    NoTrainingData(String),
    #[error("Eigendecomposition of the feature covariance failed: {0}")]
    EigendecompositionFailed(#[from] ndarray_linalg::error::LinalgError),
}

/// One row of `model_metrics.csv`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    pub target: String,
    pub model: String,
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
    pub pca_components: usize,
}

impl MetricRecord {
    fn new(target: Target, kind: ModelKind, metrics: Metrics, pca_components: usize) -> Self {
        Self {
            target: target.column().to_string(),
            model: kind.label().to_string(),
            r2: metrics.r2,
            rmse: metrics.rmse,
            mae: metrics.mae,
            pca_components,
        }
    }
}

/// Everything produced for one target.
pub struct TargetModels {
    pub records: Vec<MetricRecord>,
    /// Forest importances, highest first.
    pub importances: Vec<(String, f64)>,
    pub models: Vec<TrainedModel>,
}

impl TargetModels {
    pub fn boosted(&self) -> Option<&TrainedModel> {
        self.models
            .iter()
            .find(|m| m.estimator.model_kind() == ModelKind::GradientBoosting)
    }
}

pub fn train_target(
    data: &ModelData,
    target: Target,
    scenario: Scenario,
    config: &TrainingConfig,
    progress: &mut dyn TrainProgressObserver,
) -> Result<TargetModels, TrainError> {
    let split = train_test_split(data.n_samples(), config.test_fraction, config.seed);
    let (x_train, y_train) = take(&data.x, &data.y, &split.train);
    let (x_test, y_test) = take(&data.x, &data.y, &split.test);
    log::info!(
        "Training {target} ({scenario}): {} train / {} test rows, {} features",
        y_train.len(),
        y_test.len(),
        data.feature_names.len()
    );

    let scaler = StandardScaler::fit(&x_train);
    let x_train_scaled = scaler.transform(&x_train);
    let x_test_scaled = scaler.transform(&x_test);
    let pca_components = components_for_variance(&x_train_scaled, config.pca_variance_ratio)?;
    log::info!(
        "PCA: {pca_components} components explain {:.0}% of the variance",
        config.pca_variance_ratio * 100.0
    );

    let lasso_cv = LassoCv {
        n_alphas: config.lasso_alphas,
        folds: config.lasso_folds,
        max_iterations: config.lasso_max_iterations,
        tolerance: config.lasso_tolerance,
    }
    .fit(&x_train_scaled, &y_train, progress)?;
    let lasso_metrics = evaluate(y_test.view(), lasso_cv.fit.predict(&x_test_scaled).view());

    let forest = fit_forest(
        &x_train,
        &y_train,
        &ForestParams {
            n_trees: config.forest_trees,
            max_depth: None,
            min_samples_leaf: 1,
            seed: config.seed,
        },
        progress,
    );
    let forest_metrics = evaluate(y_test.view(), forest.predict(x_test.view()).view());

    let boosted = fit_boosting(
        &x_train,
        &y_train,
        &BoostParams {
            rounds: config.boosting_rounds,
            learning_rate: config.learning_rate,
            max_depth: config.max_depth,
            row_subsample: config.row_subsample,
            column_subsample: config.column_subsample,
            l2: config.leaf_l2,
            seed: config.seed,
        },
        progress,
    );
    let boosted_metrics = evaluate(y_test.view(), boosted.predict(x_test.view()).view());

    let mut importances: Vec<(String, f64)> = data
        .feature_names
        .iter()
        .cloned()
        .zip(forest.importances.iter().copied())
        .collect();
    importances.sort_by(|a, b| b.1.total_cmp(&a.1));

    let fitted = [
        (lasso_metrics, Estimator::Lasso(LinearModel::from_fit(scaler, &lasso_cv))),
        (forest_metrics, Estimator::RandomForest(forest)),
        (boosted_metrics, Estimator::GradientBoosting(boosted)),
    ];
    let mut records = Vec::with_capacity(fitted.len());
    let mut models = Vec::with_capacity(fitted.len());
    for (metrics, estimator) in fitted {
        let kind = estimator.model_kind();
        log::info!(
            "{} -> R2={:.3} | RMSE={:.3} | MAE={:.3}",
            kind.label(),
            metrics.r2,
            metrics.rmse,
            metrics.mae
        );
        records.push(MetricRecord::new(target, kind, metrics, pca_components));
        models.push(TrainedModel {
            target: target.column().to_string(),
            scenario: scenario.as_str().to_string(),
            feature_names: data.feature_names.clone(),
            metrics: Some(metrics),
            estimator,
        });
    }

    Ok(TargetModels {
        records,
        importances,
        models,
    })
}

fn write_importances(path: &Path, importances: &[(String, f64)]) -> Result<(), TrainError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["feature", "importance"])?;
    for (feature, importance) in importances {
        let value = importance.to_string();
        writer.write_record([feature.as_str(), value.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_metrics(path: &Path, records: &[MetricRecord]) -> Result<(), TrainError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Trains every target of a scenario and writes its metrics, importances and
/// model artifacts. Targets without a model data file are skipped.
pub fn train_scenario(
    paths: &PathsConfig,
    config: &TrainingConfig,
    scenario: Scenario,
    progress: &mut dyn TrainProgressObserver,
) -> Result<Vec<MetricRecord>, TrainError> {
    let timer = StepTimer::start(format!("Train Models - {}", scenario.title()));
    let out_dir = paths.interim_scenario_dir(scenario);
    fs::create_dir_all(&out_dir)?;
    fs::create_dir_all(&paths.models_dir)?;

    let mut records = Vec::new();
    for target in Target::ALL {
        let data_path = paths.model_data(scenario, target);
        if !data_path.exists() {
            log::warn!("{} not found, skipping {target}.", data_path.display());
            continue;
        }
        let data = load_model_data(&data_path, target.column())?;
        let trained = train_target(&data, target, scenario, config, progress)?;

        let importance_path = out_dir.join(format!("rf_importances_{}.csv", target.column()));
        write_importances(&importance_path, &trained.importances)?;
        log::info!("Forest importances saved to {}", importance_path.display());

        if config.save_all_models {
            for model in &trained.models {
                let path =
                    artifact_path_for(&paths.models_dir, model.estimator.model_kind(), scenario, target);
                model.save(&path)?;
                log::info!("Model saved to {}", path.display());
            }
        } else if let Some(model) = trained.boosted() {
            let path = artifact_path(&paths.models_dir, scenario, target);
            model.save(&path)?;
            log::info!("Boosted model saved to {}", path.display());
        }
        records.extend(trained.records);
    }

    if records.is_empty() {
        return Err(TrainError::NoTrainingData(scenario.as_str().to_string()));
    }
    let metrics_path = out_dir.join("model_metrics.csv");
    write_metrics(&metrics_path, &records)?;
    log::info!("Metrics saved to {}", metrics_path.display());
    timer.finish();
    Ok(records)
}
