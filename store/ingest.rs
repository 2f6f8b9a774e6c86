//! Loads pipeline outputs into the store: the final county table, both
//! scenarios' metrics, and the best-model comparison rows. Missing inputs
//! are logged and skipped so a partial pipeline still ingests what exists.

use chrono::Datelike;
use std::path::Path;

use super::{CityMindStore, NewPlace, StoreError};
use crate::config::PathsConfig;
use crate::pipeline::compare::{BestModel, best_models_path, read_metrics};
use crate::pipeline::table::Table;
use crate::pipeline::wrangle::zero_pad;
use crate::proxy::Scenario;
use crate::step::StepTimer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub places: usize,
    pub metrics: usize,
    pub comparisons: usize,
}

/// Scenario named by a file path; paths naming neither map to no-social.
pub fn detect_dataset_type(path: &Path) -> Scenario {
    let lower = path.to_string_lossy().to_lowercase();
    if lower.contains("full_social") {
        Scenario::FullSocial
    } else {
        Scenario::NoSocial
    }
}

/// County rows from the final table. Rows without a FIPS code are skipped.
pub fn places_from_table(table: &Table, year: i32) -> Result<Vec<NewPlace>, StoreError> {
    let mut table = table.clone();
    table.coerce_text("countyfips")?;
    let fips = table.text("countyfips")?;
    let names = table.text("countyname").ok();
    let states = table.text("statedesc").ok();
    let population = table.numeric("totalpopulation").ok();

    let text_at = |column: Option<&[Option<String>]>, i: usize| {
        column.and_then(|c| c[i].clone()).unwrap_or_default()
    };
    let mut places = Vec::with_capacity(table.height());
    for i in 0..table.height() {
        let Some(code) = fips[i].as_deref() else {
            log::error!("Row {} has no county FIPS code, skipping it.", i + 1);
            continue;
        };
        places.push(NewPlace {
            fips: zero_pad(code),
            name: text_at(names, i),
            state: text_at(states, i),
            population: population.and_then(|p| p[i]).map(|v| v.round() as i64),
            latitude: None,
            longitude: None,
            year,
        });
    }
    Ok(places)
}

fn ingest_places(store: &CityMindStore, path: &Path) -> Result<usize, StoreError> {
    if !path.exists() {
        log::warn!("{} not found, skipping county records.", path.display());
        return Ok(0);
    }
    let table = Table::read_csv(path)?;
    log::info!("Loading {} county records.", table.height());
    let places = places_from_table(&table, chrono::Local::now().year())?;
    store.upsert_places(&places)
}

fn ingest_metrics(store: &CityMindStore, path: &Path) -> Result<usize, StoreError> {
    if !path.exists() {
        log::warn!("{} not found, skipping model metrics.", path.display());
        return Ok(0);
    }
    let dataset_type = detect_dataset_type(path);
    let records = read_metrics(path, dataset_type.title())?;
    log::info!(
        "Loading {} metric rows from {} ({dataset_type}).",
        records.len(),
        path.display()
    );
    for record in &records {
        store.insert_metrics(record, dataset_type.as_str())?;
    }
    Ok(records.len())
}

fn ingest_comparisons(store: &CityMindStore, path: &Path) -> Result<usize, StoreError> {
    if !path.exists() {
        log::warn!("{} not found, skipping comparison summaries.", path.display());
        return Ok(0);
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut count = 0;
    for row in reader.deserialize::<BestModel>() {
        match row {
            Ok(best) => {
                store.insert_comparison(&best)?;
                count += 1;
            }
            Err(e) => log::error!("Skipping malformed comparison row in {}: {e}", path.display()),
        }
    }
    log::info!("Loaded {count} comparison summaries.");
    Ok(count)
}

pub fn ingest(store: &CityMindStore, paths: &PathsConfig) -> Result<IngestSummary, StoreError> {
    let timer = StepTimer::start("Ingest Into Store");
    let places = ingest_places(store, &paths.final_places())?;
    let mut metrics = 0;
    for scenario in Scenario::ALL {
        let path = paths.interim_scenario_dir(scenario).join("model_metrics.csv");
        metrics += ingest_metrics(store, &path)?;
    }
    let comparisons = ingest_comparisons(store, &best_models_path(paths))?;
    timer.finish();
    Ok(IngestSummary {
        places,
        metrics,
        comparisons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::table::ColumnData;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn dataset_type_comes_from_path() {
        assert_eq!(
            detect_dataset_type(Path::new("data/interim/full_social/model_metrics.csv")),
            Scenario::FullSocial
        );
        assert_eq!(
            detect_dataset_type(Path::new("data/interim/no_social/model_metrics.csv")),
            Scenario::NoSocial
        );
        assert_eq!(detect_dataset_type(Path::new("metrics.csv")), Scenario::NoSocial);
    }

    #[test]
    fn numeric_fips_are_padded() {
        let mut table = Table::new();
        table.push("countyfips", ColumnData::Numeric(vec![Some(1001.0), None]));
        table.push("countyname", ColumnData::Text(vec![Some("Autauga".into()), Some("X".into())]));
        table.push("totalpopulation", ColumnData::Numeric(vec![Some(58805.0), Some(1.0)]));
        let places = places_from_table(&table, 2024).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].fips, "01001");
        assert_eq!(places[0].population, Some(58805));
        assert_eq!(places[0].state, "");
    }

    #[test]
    fn ingest_loads_available_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            processed_dir: dir.path().join("processed"),
            interim_dir: dir.path().join("interim"),
            ..PathsConfig::default()
        };
        fs::create_dir_all(&paths.processed_dir).unwrap();
        fs::write(
            paths.final_places(),
            "countyfips,countyname,statedesc,totalpopulation\n01001,Autauga,Alabama,58805\n01003,Baldwin,Alabama,231767\n",
        )
        .unwrap();
        let full: PathBuf = paths.interim_scenario_dir(Scenario::FullSocial);
        fs::create_dir_all(&full).unwrap();
        fs::write(
            full.join("model_metrics.csv"),
            "target,model,r2,rmse,mae,pca_components\nmhlth_crudeprev,LassoCV,0.61,1.1,0.8,12\n",
        )
        .unwrap();

        let store = CityMindStore::in_memory().unwrap();
        let summary = ingest(&store, &paths).unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                places: 2,
                metrics: 1,
                comparisons: 0
            }
        );
        let metric = store
            .latest_metric_for("lasso", "mhlth_crudeprev", "full_social")
            .unwrap()
            .unwrap();
        assert_eq!(metric.r2_score, Some(0.61));
        assert_eq!(store.get_place("01001").unwrap().unwrap().state, "Alabama");
    }
}
