//! # County Insights Dashboard
//!
//! National summary statistics over `final_places.csv`, the counties with the
//! highest and lowest prevalence of each outcome, and a model overview pulled
//! from the store. Rendered as plain text for the terminal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::config::PathsConfig;
use crate::pipeline::select::pearson;
use crate::pipeline::table::{DataError, Table, mean};
use crate::proxy::{Scenario, Target};
use crate::store::{CityMindStore, MetricsRecord, StoreError};

/// Counties listed at each end of a ranking.
pub const RANKING_SIZE: usize = 5;
/// Model family the overview tracks; matched as a substring of model names.
const OVERVIEW_MODEL: &str = "Boosting";
const DEFAULT_YEAR: i32 = 2024;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Column '{0}' has no values to summarize.")]
    EmptyColumn(String),
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NationalSummary {
    pub avg_mhlth: f64,
    pub avg_depression: f64,
    pub correlation: Option<f64>,
    pub n_counties: usize,
    pub last_year: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountyValue {
    pub name: String,
    pub state: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Ranking {
    pub target: String,
    pub top: Vec<CountyValue>,
    pub bottom: Vec<CountyValue>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelOverview {
    pub total_places: usize,
    pub latest_metrics: Vec<MetricsRecord>,
    pub total_predictions: usize,
    pub last_update: DateTime<Utc>,
    /// Percent change of the mean boosted R2 with social predictors.
    pub social_gain: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dashboard {
    pub summary: NationalSummary,
    pub rankings: Vec<Ranking>,
    pub overview: ModelOverview,
}

pub fn compute_summary(table: &Table) -> Result<NationalSummary, InsightError> {
    let mhlth = table.numeric(Target::Mhlth.column())?;
    let depression = table.numeric(Target::Depression.column())?;
    let avg = |values: &[Option<f64>], name: &str| {
        mean(values).ok_or_else(|| InsightError::EmptyColumn(name.to_string()))
    };
    let last_year = table
        .numeric("year")
        .ok()
        .and_then(|years| years.iter().flatten().copied().reduce(f64::max))
        .map_or(DEFAULT_YEAR, |y| y as i32);

    Ok(NationalSummary {
        avg_mhlth: round_to(avg(mhlth, Target::Mhlth.column())?, 2),
        avg_depression: round_to(avg(depression, Target::Depression.column())?, 2),
        correlation: pearson(mhlth, depression).map(|r| round_to(r, 3)),
        n_counties: table.height(),
        last_year,
    })
}

/// The `n` highest and lowest counties for `target`; null values are ignored.
pub fn top_bottom(table: &Table, target: Target, n: usize) -> Result<Ranking, InsightError> {
    let values = table.numeric(target.column())?;
    let names = table.text("countyname")?;
    let states = table.text("stateabbr").ok();

    let mut rows: Vec<CountyValue> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            v.map(|value| CountyValue {
                name: names[i].clone().unwrap_or_default(),
                state: states.and_then(|s| s[i].clone()).unwrap_or_default(),
                value,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.value.total_cmp(&a.value));

    let top = rows.iter().take(n).cloned().collect();
    let bottom = rows.iter().rev().take(n).cloned().collect();
    Ok(Ranking {
        target: target.column().to_string(),
        top,
        bottom,
    })
}

/// Percent change between two mean R2 values; zero when either is missing
/// or the baseline is zero.
pub fn social_gain(full_social: Option<f64>, no_social: Option<f64>) -> f64 {
    match (full_social, no_social) {
        (Some(full), Some(no)) if no != 0.0 && full != 0.0 => (full - no) / no * 100.0,
        _ => 0.0,
    }
}

pub fn model_overview(store: &CityMindStore) -> Result<ModelOverview, InsightError> {
    let mut latest_metrics = Vec::new();
    for target in [Target::Mhlth, Target::Depression] {
        for scenario in Scenario::ALL {
            if let Some(metric) =
                store.latest_metric_for(OVERVIEW_MODEL, target.column(), scenario.as_str())?
            {
                latest_metrics.push(metric);
            }
        }
    }
    let last_update = store
        .latest_predictions(1)?
        .first()
        .map_or_else(Utc::now, |p| p.prediction_date);

    Ok(ModelOverview {
        total_places: store.count_places()?,
        latest_metrics,
        total_predictions: store.count_predictions()?,
        last_update,
        social_gain: social_gain(
            store.average_r2(Scenario::FullSocial.as_str(), OVERVIEW_MODEL)?,
            store.average_r2(Scenario::NoSocial.as_str(), OVERVIEW_MODEL)?,
        ),
    })
}

pub fn build_dashboard(paths: &PathsConfig, store: &CityMindStore) -> Result<Dashboard, InsightError> {
    let mut table = Table::read_csv(&paths.final_places())?;
    for column in ["countyname", "stateabbr"] {
        if table.contains(column) {
            table.coerce_text(column)?;
        }
    }
    let summary = compute_summary(&table)?;
    log::info!("Insights computed over {} counties", summary.n_counties);
    let rankings = [Target::Mhlth, Target::Depression]
        .into_iter()
        .map(|t| top_bottom(&table, t, RANKING_SIZE))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Dashboard {
        summary,
        rankings,
        overview: model_overview(store)?,
    })
}

fn opt(value: Option<f64>, decimals: usize) -> String {
    value.map_or("n/a".to_string(), |v| format!("{v:.decimals$}"))
}

impl fmt::Display for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "CityMind dashboard ({} counties, {})", s.n_counties, s.last_year)?;
        writeln!(f, "  Mean frequent mental distress: {:.2}%", s.avg_mhlth)?;
        writeln!(f, "  Mean depression:               {:.2}%", s.avg_depression)?;
        writeln!(f, "  Correlation:                   {}", opt(s.correlation, 3))?;

        for ranking in &self.rankings {
            writeln!(f)?;
            writeln!(f, "{}", ranking.target)?;
            for (label, rows) in [("highest", &ranking.top), ("lowest", &ranking.bottom)] {
                writeln!(f, "  {label}:")?;
                for row in rows {
                    writeln!(f, "    {:<32} {:<4} {:>6.2}", row.name, row.state, row.value)?;
                }
            }
        }

        let o = &self.overview;
        writeln!(f)?;
        writeln!(f, "Stored counties: {}", o.total_places)?;
        writeln!(f, "Stored predictions: {}", o.total_predictions)?;
        writeln!(f, "Last update: {}", o.last_update.format("%Y-%m-%d %H:%M UTC"))?;
        for metric in &o.latest_metrics {
            writeln!(
                f,
                "  {} / {} / {}: R2={} RMSE={} MAE={}",
                metric.target,
                metric.dataset_type,
                metric.model_name,
                opt(metric.r2_score, 3),
                opt(metric.rmse, 3),
                opt(metric.mae, 3)
            )?;
        }
        write!(f, "Social predictor R2 gain: {:+.2}%", o.social_gain)
    }
}
