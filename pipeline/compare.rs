//! # Scenario Comparison and Report
//!
//! Joins the no-social and full-social metric tables on `(target, model)`,
//! computes the metric deltas, and renders the Markdown summary report.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PathsConfig;
use crate::pipeline::table::{DataError, Table};
use crate::proxy::Scenario;
use crate::step::StepTimer;
use crate::train::estimate::MetricRecord;
use crate::train::model::ModelKind;

const REQUIRED_COLUMNS: [&str; 5] = ["target", "model", "r2", "rmse", "mae"];

#[derive(Error, Debug)]
pub enum CompareError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Metrics file '{0}' was not found; train both scenarios first.")]
    MissingFile(String),
    #[error("Columns {missing:?} are missing from the {dataset} metrics.")]
    MissingColumns {
        dataset: &'static str,
        missing: Vec<String>,
    },
    #[error("The comparison table is empty; run the comparison step first.")]
    Empty,
}

/// One row of `comparison_summary_wide.csv`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonRow {
    pub target: String,
    pub model: String,
    pub r2_no_social: f64,
    pub rmse_no_social: f64,
    pub mae_no_social: f64,
    pub r2_full_social: f64,
    pub rmse_full_social: f64,
    pub mae_full_social: f64,
    pub r2_diff: f64,
    /// Undefined when the no-social R2 is zero.
    pub r2_diff_pct: Option<f64>,
    pub rmse_diff: f64,
    pub mae_diff: f64,
}

/// One row of the long-format `comparison_summary.csv`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LongRow {
    pub target: String,
    pub model: String,
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
    pub scenario: String,
}

/// The strongest model of a target within one scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BestModel {
    pub target: String,
    pub dataset_type: String,
    pub best_model: String,
    pub best_r2: f64,
    pub best_mae: f64,
    pub best_rmse: f64,
}

/// Reads a `model_metrics.csv`, checking the required columns first.
pub fn read_metrics(path: &Path, dataset: &'static str) -> Result<Vec<MetricRecord>, CompareError> {
    if !path.exists() {
        return Err(CompareError::MissingFile(path.display().to_string()));
    }
    let table = Table::read_csv(path)?;
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !table.contains(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CompareError::MissingColumns { dataset, missing });
    }

    let targets = table.text("target")?;
    let models = table.text("model")?;
    let r2 = table.numeric("r2")?;
    let rmse = table.numeric("rmse")?;
    let mae = table.numeric("mae")?;
    let pca = table.numeric("pca_components").ok();

    let mut records = Vec::with_capacity(table.height());
    for i in 0..table.height() {
        let (Some(target), Some(model), Some(r2), Some(rmse), Some(mae)) =
            (&targets[i], &models[i], r2[i], rmse[i], mae[i])
        else {
            log::warn!("Skipping incomplete metrics row {} in {}", i + 1, path.display());
            continue;
        };
        let model = ModelKind::from_label(model).map_or_else(|| model.clone(), |k| k.label().to_string());
        records.push(MetricRecord {
            target: target.clone(),
            model,
            r2,
            rmse,
            mae,
            pca_components: pca.and_then(|p| p[i]).map_or(0, |v| v as usize),
        });
    }
    Ok(records)
}

/// Inner join on `(target, model)` in no-social order.
pub fn compare(no_social: &[MetricRecord], full_social: &[MetricRecord]) -> Vec<ComparisonRow> {
    no_social
        .iter()
        .filter_map(|no| {
            let full = full_social
                .iter()
                .find(|f| f.target == no.target && f.model == no.model)?;
            let r2_diff = full.r2 - no.r2;
            Some(ComparisonRow {
                target: no.target.clone(),
                model: no.model.clone(),
                r2_no_social: no.r2,
                rmse_no_social: no.rmse,
                mae_no_social: no.mae,
                r2_full_social: full.r2,
                rmse_full_social: full.rmse,
                mae_full_social: full.mae,
                r2_diff,
                r2_diff_pct: (no.r2 != 0.0).then(|| r2_diff / no.r2 * 100.0),
                rmse_diff: full.rmse - no.rmse,
                mae_diff: full.mae - no.mae,
            })
        })
        .collect()
}

/// Mean R2 gain and mean percentage gain (over rows where it is defined).
pub fn mean_gain(rows: &[ComparisonRow]) -> (Option<f64>, Option<f64>) {
    let mean = |values: Vec<f64>| {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };
    (
        mean(rows.iter().map(|r| r.r2_diff).collect()),
        mean(rows.iter().filter_map(|r| r.r2_diff_pct).collect()),
    )
}

/// Highest-R2 model per target, in first-seen target order.
pub fn best_models(records: &[MetricRecord], scenario: Scenario) -> Vec<BestModel> {
    let mut best: Vec<BestModel> = Vec::new();
    for record in records {
        let candidate = BestModel {
            target: record.target.clone(),
            dataset_type: scenario.as_str().to_string(),
            best_model: record.model.clone(),
            best_r2: record.r2,
            best_mae: record.mae,
            best_rmse: record.rmse,
        };
        match best.iter_mut().find(|b| b.target == record.target) {
            Some(current) if record.r2 > current.best_r2 => *current = candidate,
            Some(_) => {}
            None => best.push(candidate),
        }
    }
    best
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), CompareError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub struct ComparisonOutcome {
    pub rows: Vec<ComparisonRow>,
    pub best: Vec<BestModel>,
}

pub fn wide_path(paths: &PathsConfig) -> PathBuf {
    paths.comparison_dir().join("comparison_summary_wide.csv")
}

pub fn best_models_path(paths: &PathsConfig) -> PathBuf {
    paths.comparison_dir().join("best_models.csv")
}

/// Compares both scenarios' metrics and writes the wide, long and best-model
/// tables under the comparison directory.
pub fn run_compare(paths: &PathsConfig) -> Result<ComparisonOutcome, CompareError> {
    let timer = StepTimer::start("Compare Results");
    let no_path = paths.interim_scenario_dir(Scenario::NoSocial).join("model_metrics.csv");
    let full_path = paths.interim_scenario_dir(Scenario::FullSocial).join("model_metrics.csv");
    log::info!("Reading results from {} and {}", no_path.display(), full_path.display());
    let no_social = read_metrics(&no_path, "No Social")?;
    let full_social = read_metrics(&full_path, "Full Social")?;

    let rows = compare(&no_social, &full_social);
    let out_dir = paths.comparison_dir();
    fs::create_dir_all(&out_dir)?;
    write_rows(&wide_path(paths), &rows)?;

    let long: Vec<LongRow> = [(Scenario::NoSocial, &no_social), (Scenario::FullSocial, &full_social)]
        .into_iter()
        .flat_map(|(scenario, records)| {
            records.iter().map(move |r| LongRow {
                target: r.target.clone(),
                model: r.model.clone(),
                r2: r.r2,
                rmse: r.rmse,
                mae: r.mae,
                scenario: scenario.title().to_string(),
            })
        })
        .collect();
    write_rows(&out_dir.join("comparison_summary.csv"), &long)?;

    let mut best = best_models(&no_social, Scenario::NoSocial);
    best.extend(best_models(&full_social, Scenario::FullSocial));
    write_rows(&best_models_path(paths), &best)?;

    for row in &rows {
        log::info!(
            "{} / {}: R2 {:.4} -> {:.4} ({:+.4})",
            row.target,
            row.model,
            row.r2_no_social,
            row.r2_full_social,
            row.r2_diff
        );
    }
    if let (Some(gain), pct) = mean_gain(&rows) {
        log::info!(
            "Mean R2 gain: {gain:.4} ({})",
            pct.map_or("n/a".to_string(), |p| format!("{p:.2}%"))
        );
    }
    timer.finish();
    Ok(ComparisonOutcome { rows, best })
}

pub fn read_comparison(path: &Path) -> Result<Vec<ComparisonRow>, CompareError> {
    if !path.exists() {
        return Err(CompareError::MissingFile(path.display().to_string()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<ComparisonRow>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn signed_pct(value: Option<f64>) -> String {
    value.map_or("n/a".to_string(), |v| format!("{v:+.2}%"))
}

/// Renders the Markdown report for a comparison table.
pub fn render_report(rows: &[ComparisonRow], date: &str) -> Result<String, CompareError> {
    let best = rows
        .iter()
        .max_by(|a, b| a.r2_full_social.total_cmp(&b.r2_full_social))
        .ok_or(CompareError::Empty)?;
    let (gain, gain_pct) = mean_gain(rows);

    let mut out = String::new();
    out.push_str(&format!("# CityMind Model Report ({date})\n\n"));
    out.push_str(
        "Comparison of county-level mental health models trained with and without \
         social determinant predictors.\n\n---\n\n",
    );
    out.push_str("## Numeric Summary\n\n");
    out.push_str("| Target | Model | R2 (No Social) | R2 (Full Social) | Delta R2 | Delta R2 (%) |\n");
    out.push_str("|--------|-------|----------------|------------------|----------|--------------|\n");
    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {:.3} | {:.3} | {:+.4} | {} |\n",
            row.target,
            row.model,
            row.r2_no_social,
            row.r2_full_social,
            row.r2_diff,
            signed_pct(row.r2_diff_pct)
        ));
    }
    out.push_str(&format!(
        "\n**Mean Delta R2:** {}  \n**Mean Delta R2 (%):** {}\n\n---\n\n",
        gain.map_or("n/a".to_string(), |g| format!("{g:.4}")),
        gain_pct.map_or("n/a".to_string(), |p| format!("{p:.2}%"))
    ));
    out.push_str("## Best Full Social Model\n\n");
    out.push_str(&format!(
        "**{}** for **{}** with R2 = **{:.3}** (RMSE {:.3}, MAE {:.3}).\n",
        best.model, best.target, best.r2_full_social, best.rmse_full_social, best.mae_full_social
    ));
    Ok(out)
}

/// Writes `reports/citymind_report_<date>.md` from the saved comparison.
pub fn run_report(paths: &PathsConfig) -> Result<PathBuf, CompareError> {
    let timer = StepTimer::start("Generate Report");
    let rows = read_comparison(&wide_path(paths))?;
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let text = render_report(&rows, &date)?;
    fs::create_dir_all(&paths.reports_dir)?;
    let path = paths.reports_dir.join(format!("citymind_report_{date}.md"));
    fs::write(&path, text)?;
    log::info!("Markdown report saved to {}", path.display());
    timer.finish();
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record(target: &str, model: &str, r2: f64) -> MetricRecord {
        MetricRecord {
            target: target.into(),
            model: model.into(),
            r2,
            rmse: 1.0 - r2,
            mae: 0.5,
            pca_components: 9,
        }
    }

    #[test]
    fn join_computes_deltas() {
        let no = vec![
            record("mhlth_crudeprev", "LassoCV", 0.5),
            record("mhlth_crudeprev", "RandomForest", 0.0),
            record("depression_crudeprev", "LassoCV", 0.4),
        ];
        let full = vec![
            record("mhlth_crudeprev", "RandomForest", 0.3),
            record("mhlth_crudeprev", "LassoCV", 0.6),
        ];
        let rows = compare(&no, &full);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].model, "LassoCV");
        assert_abs_diff_eq!(rows[0].r2_diff, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(rows[0].r2_diff_pct.unwrap(), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(rows[0].rmse_diff, -0.1, epsilon = 1e-12);
        assert_eq!(rows[1].r2_diff_pct, None);

        let (gain, pct) = mean_gain(&rows);
        assert_abs_diff_eq!(gain.unwrap(), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(pct.unwrap(), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn best_model_per_target() {
        let records = vec![
            record("a", "LassoCV", 0.5),
            record("a", "GradientBoosting", 0.7),
            record("b", "RandomForest", 0.2),
        ];
        let best = best_models(&records, Scenario::FullSocial);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].best_model, "GradientBoosting");
        assert_eq!(best[0].dataset_type, "full_social");
        assert_eq!(best[1].best_r2, 0.2);
    }

    #[test]
    fn missing_columns_are_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_metrics.csv");
        fs::write(&path, "target,model,r2\nmhlth_crudeprev,LassoCV,0.5\n").unwrap();
        match read_metrics(&path, "No Social") {
            Err(CompareError::MissingColumns { dataset, missing }) => {
                assert_eq!(dataset, "No Social");
                assert_eq!(missing, vec!["rmse", "mae"]);
            }
            other => panic!("Expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn legacy_xgboost_rows_read_as_the_boosted_family() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_metrics.csv");
        fs::write(
            &path,
            "target,model,r2,rmse,mae\n\
             mhlth_crudeprev,XGBoost,0.81,1.2,0.9\n\
             mhlth_crudeprev,LassoCV,0.7,1.5,1.1\n\
             mhlth_crudeprev,ElasticNet,0.6,1.7,1.3\n",
        )
        .unwrap();
        let records = read_metrics(&path, "No Social").unwrap();
        let models: Vec<&str> = records.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec!["GradientBoosting", "LassoCV", "ElasticNet"]);
        assert_eq!(ModelKind::from_label(" XGBoost "), Some(ModelKind::GradientBoosting));
        assert_eq!(ModelKind::from_label("RandomForest"), Some(ModelKind::RandomForest));
        assert_eq!(ModelKind::from_label("ElasticNet"), None);
    }

    #[test]
    fn wide_table_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.csv");
        let rows = compare(
            &[record("m", "LassoCV", 0.0), record("m", "RandomForest", 0.5)],
            &[record("m", "LassoCV", 0.1), record("m", "RandomForest", 0.6)],
        );
        write_rows(&path, &rows).unwrap();
        assert_eq!(read_comparison(&path).unwrap(), rows);
    }

    #[test]
    fn report_lists_rows_and_best_model() {
        let rows = compare(
            &[record("mhlth_crudeprev", "LassoCV", 0.5), record("depression_crudeprev", "RandomForest", 0.0)],
            &[record("mhlth_crudeprev", "LassoCV", 0.55), record("depression_crudeprev", "RandomForest", 0.8)],
        );
        let text = render_report(&rows, "2025-01-31").unwrap();
        assert!(text.starts_with("# CityMind Model Report (2025-01-31)"));
        assert!(text.contains("| mhlth_crudeprev | LassoCV | 0.500 | 0.550 | +0.0500 | +10.00% |"));
        assert!(text.contains("| n/a |"));
        assert!(text.contains("**RandomForest** for **depression_crudeprev**"));
        assert!(matches!(render_report(&[], "x"), Err(CompareError::Empty)));
    }
}
