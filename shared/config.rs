// ========================================================================================
//                                 Runtime Configuration
// ========================================================================================

// Every setting has a built-in default so the tool runs without a config file.
// A `citymind.toml` in the working directory (or one passed via `--config`)
// overrides individual fields; unspecified fields keep their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::proxy::{Scenario, Target};

/// Looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "citymind.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw county-level survey export.
    pub raw_csv: PathBuf,
    pub processed_dir: PathBuf,
    pub interim_dir: PathBuf,
    pub models_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub database: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_csv: PathBuf::from("data/raw/places_county_2024.csv"),
            processed_dir: PathBuf::from("data/processed"),
            interim_dir: PathBuf::from("data/interim"),
            models_dir: PathBuf::from("models"),
            reports_dir: PathBuf::from("reports"),
            database: PathBuf::from("citymind.sqlite3"),
        }
    }
}

impl PathsConfig {
    pub fn processed_scenario_dir(&self, scenario: Scenario) -> PathBuf {
        self.processed_dir.join(scenario.as_str())
    }

    pub fn interim_scenario_dir(&self, scenario: Scenario) -> PathBuf {
        self.interim_dir.join(scenario.as_str())
    }

    pub fn comparison_dir(&self) -> PathBuf {
        self.interim_dir.join("comparison")
    }

    /// The cleaned table feature selection and preparation start from.
    pub fn base_table(&self, scenario: Scenario) -> PathBuf {
        let file = match scenario {
            Scenario::NoSocial => "places_no_social_clean.csv",
            Scenario::FullSocial => "places_imputed_full_clean.csv",
        };
        self.processed_scenario_dir(scenario).join(file)
    }

    /// Fully imputed county table used for ingestion and the dashboard.
    pub fn final_places(&self) -> PathBuf {
        self.processed_dir.join("final_places.csv")
    }

    pub fn model_data(&self, scenario: Scenario, target: Target) -> PathBuf {
        self.processed_scenario_dir(scenario)
            .join(format!("model_data_{}.csv", target.column()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_fraction: f64,
    pub seed: u64,
    pub correlation_threshold: f64,
    pub lasso_folds: usize,
    pub lasso_alphas: usize,
    pub lasso_max_iterations: usize,
    pub lasso_tolerance: f64,
    pub forest_trees: usize,
    pub boosting_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub row_subsample: f64,
    pub column_subsample: f64,
    pub leaf_l2: f64,
    pub pca_variance_ratio: f64,
    /// Also write the Lasso and forest artifacts, not only the boosted one.
    pub save_all_models: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            correlation_threshold: 0.3,
            lasso_folds: 5,
            lasso_alphas: 100,
            lasso_max_iterations: 10_000,
            lasso_tolerance: 1e-4,
            forest_trees: 300,
            boosting_rounds: 400,
            learning_rate: 0.05,
            max_depth: 5,
            row_subsample: 0.8,
            column_subsample: 0.8,
            leaf_l2: 1.0,
            pca_variance_ratio: 0.95,
            save_all_models: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CityMindConfig {
    pub paths: PathsConfig,
    pub training: TrainingConfig,
}

impl CityMindConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: CityMindConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Uses `explicit` if given, else `citymind.toml` when it exists, else the
    /// defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    log::info!("Using configuration from {}", fallback.display());
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.training;
        let unit = |name: &str, v: f64| {
            if v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be in (0, 1], got {v}")))
            }
        };
        unit("training.row_subsample", t.row_subsample)?;
        unit("training.column_subsample", t.column_subsample)?;
        unit("training.pca_variance_ratio", t.pca_variance_ratio)?;
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "training.test_fraction must be in (0, 1), got {}",
                t.test_fraction
            )));
        }
        if t.lasso_folds < 2 {
            return Err(ConfigError::Invalid(
                "training.lasso_folds must be at least 2".to_string(),
            ));
        }
        if t.forest_trees == 0 || t.boosting_rounds == 0 || t.max_depth == 0 {
            return Err(ConfigError::Invalid(
                "training.forest_trees, boosting_rounds and max_depth must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
