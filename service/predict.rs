//! # Proxy-Vector Predictions
//!
//! Turns a client's JSON proxy vector into a stored prediction: parse,
//! validate the target, expand to the model's schema, score with the boosted
//! model of the requested scenario, and persist the request alongside the
//! result.

use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::expand::expand;
use crate::proxy::{ProxyError, ProxyVector, Target};
use crate::store::{CityMindStore, NewPrediction, PredictionRecord, StoreError};
use crate::train::model::{ModelError, TrainedModel, artifact_path};

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No input data was received.")]
    EmptyInput,
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("Unsupported target '{0}'. Use 'mhlth_crudeprev' or 'depression_crudeprev'.")]
    UnsupportedTarget(String),
    #[error("No model was found at: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct PredictionService {
    models_dir: PathBuf,
    store: CityMindStore,
}

impl PredictionService {
    pub fn new(models_dir: impl Into<PathBuf>, store: CityMindStore) -> Self {
        Self {
            models_dir: models_dir.into(),
            store,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn store(&self) -> &CityMindStore {
        &self.store
    }

    /// Scores a proxy vector and stores the prediction with the raw input.
    pub fn predict(&self, input: &Value) -> Result<PredictionRecord, PredictError> {
        let is_empty = match input {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Err(PredictError::EmptyInput);
        }

        let proxy = ProxyVector::from_json(input)?;
        let target: Target = proxy
            .known_target()
            .ok_or_else(|| PredictError::UnsupportedTarget(proxy.target.clone()))?;
        let features = expand(&proxy);

        let path = artifact_path(&self.models_dir, proxy.scenario(), target);
        if !path.exists() {
            return Err(PredictError::ModelNotFound(path));
        }
        let model = TrainedModel::load_for(&path, target)?;
        let predicted_value = model.predict_row(&features)?;
        log::info!(
            "Predicted {target} = {predicted_value:.3} with {} ({} features)",
            path.display(),
            model.feature_names.len()
        );

        let record = self.store.insert_prediction(&NewPrediction {
            place_id: None,
            model_used: path.display().to_string(),
            target: target.column().to_string(),
            predicted_value,
            input_vector: input.clone(),
        })?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Scenario;
    use crate::train::boost::BoostedModel;
    use crate::train::model::Estimator;
    use crate::train::tree::{RegressionTree, TreeNode};
    use serde_json::json;

    fn leaf(value: f64) -> TreeNode {
        TreeNode {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            leaf: true,
        }
    }

    fn write_model(dir: &Path, scenario: Scenario, target: Target, feature: &str) {
        let model = TrainedModel {
            target: target.column().to_string(),
            scenario: scenario.as_str().to_string(),
            feature_names: vec![feature.to_string()],
            metrics: None,
            estimator: Estimator::GradientBoosting(BoostedModel {
                base_score: 15.0,
                learning_rate: 1.0,
                trees: vec![RegressionTree {
                    nodes: vec![
                        TreeNode {
                            feature: 0,
                            threshold: 0.5,
                            left: 1,
                            right: 2,
                            value: 0.0,
                            leaf: false,
                        },
                        leaf(-2.0),
                        leaf(2.0),
                    ],
                }],
            }),
        };
        model.save(&artifact_path(dir, scenario, target)).unwrap();
    }

    fn service(dir: &Path) -> PredictionService {
        PredictionService::new(dir, CityMindStore::in_memory().unwrap())
    }

    #[test]
    fn empty_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        assert!(matches!(svc.predict(&json!({})), Err(PredictError::EmptyInput)));
        assert!(matches!(svc.predict(&Value::Null), Err(PredictError::EmptyInput)));
    }

    #[test]
    fn unknown_target_is_rejected_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let result = svc.predict(&json!({"target": "obesity_crudeprev", "use_social": false}));
        assert!(matches!(result, Err(PredictError::UnsupportedTarget(t)) if t == "obesity_crudeprev"));
        assert!(matches!(
            svc.predict(&json!({"health_index": [1]})),
            Err(PredictError::Proxy(_))
        ));
    }

    #[test]
    fn missing_artifact_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        match svc.predict(&json!({"target": "depression_crudeprev", "use_social": false})) {
            Err(PredictError::ModelNotFound(path)) => {
                assert!(path.ends_with("boosted_no_social_depression.toml"));
            }
            other => panic!("Expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn prediction_is_scored_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        // Default environment index: binge = (1 - 0.4) * 20 = 12, right leaf.
        write_model(dir.path(), Scenario::FullSocial, Target::Mhlth, "binge_crudeprev");
        let svc = service(dir.path());
        let input = json!({"target": "mhlth_crudeprev", "use_social": true, "health_index": 0.3});
        let record = svc.predict(&input).unwrap();
        assert_eq!(record.predicted_value, 17.0);
        assert_eq!(record.target, "mhlth_crudeprev");
        assert_eq!(record.input_vector, input);
        assert!(record.model_used.ends_with("boosted_full_social_mhlth.toml"));

        let stored = svc.store().latest_predictions(1).unwrap();
        assert_eq!(stored[0].id, record.id);
        assert_eq!(svc.store().count_predictions().unwrap(), 1);
    }
}
