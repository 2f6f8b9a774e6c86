//! # Survey Wrangling
//!
//! Turns the raw county export into the base datasets every later step reads:
//!
//! - `no_social`: crude prevalence columns without the social determinants,
//!   rows with missing critical medical measures removed.
//! - `full_social`: social determinants imputed with the state median, the
//!   same row filter, then every remaining gap filled with the column mean.
//!
//! Column names are normalized (trimmed, lowercased, spaces and hyphens to
//! underscores) before anything else looks at them.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PathsConfig;
use crate::pipeline::table::{ColumnData, DataError, Table};
use crate::proxy::{Scenario, Target};
use crate::schema::{CRITICAL_MEDICAL_COLUMNS, META_COLUMNS, SOCIAL_COLUMNS};

const FIPS_WIDTH: usize = 5;

/// One line of `wrangling_summary.csv`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatasetSummary {
    pub dataset: String,
    pub rows: usize,
    pub cols: usize,
    pub nulls: usize,
}

/// The three base tables produced from the raw export.
#[derive(Debug, Clone)]
pub struct WrangledTables {
    pub no_social: Table,
    pub imputed: Table,
    pub imputed_full: Table,
}

pub fn normalize_column_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

pub fn zero_pad(fips: &str) -> String {
    format!("{fips:0>FIPS_WIDTH$}")
}

/// Runs the pure part of wrangling on an already loaded raw table.
pub fn wrangle_table(mut raw: Table) -> Result<WrangledTables, DataError> {
    raw.rename_columns(normalize_column_name);
    let dropped = raw.dedup_columns();
    if !dropped.is_empty() {
        log::warn!("Dropped duplicated columns after normalization: {dropped:?}");
    }

    raw.coerce_text("countyfips")?;
    if let Some(ColumnData::Text(values)) = raw.column("countyfips") {
        let padded = values.iter().map(|v| v.as_deref().map(zero_pad)).collect();
        raw.push("countyfips", ColumnData::Text(padded));
    }
    for name in ["stateabbr", "statedesc", "countyname"] {
        raw.coerce_text(name)?;
    }

    let crude: Vec<String> = raw
        .names()
        .into_iter()
        .filter(|n| n.ends_with("crudeprev"))
        .map(str::to_string)
        .collect();
    for name in ["totalpopulation", "totalpop18plus"]
        .into_iter()
        .chain(crude.iter().map(String::as_str))
    {
        raw.coerce_numeric(name)?;
    }

    let mut keep: Vec<&str> = META_COLUMNS.to_vec();
    keep.extend(crude.iter().map(String::as_str));
    let clean = raw.select(&keep)?;
    log::info!("Selected {} columns ({} crude prevalence)", clean.width(), crude.len());

    let present_social: Vec<&str> = SOCIAL_COLUMNS
        .iter()
        .copied()
        .filter(|&name| clean.contains(name))
        .collect();
    let imputed = clean.fill_nulls_with_group_median(&present_social, "stateabbr")?;

    let no_social = clean
        .drop_columns(SOCIAL_COLUMNS)
        .drop_null_rows(CRITICAL_MEDICAL_COLUMNS)?;
    let imputed = imputed.drop_null_rows(CRITICAL_MEDICAL_COLUMNS)?;

    let crude_names: Vec<&str> = crude.iter().map(String::as_str).collect();
    let imputed_full = imputed.fill_nulls_with_mean(&crude_names)?;

    Ok(WrangledTables {
        no_social,
        imputed,
        imputed_full,
    })
}

/// Reads the raw export, writes every wrangling output and returns their summary.
pub fn run(raw_csv: &Path, paths: &PathsConfig) -> Result<Vec<DatasetSummary>, DataError> {
    log::info!("Loading raw survey data from: {}", raw_csv.display());
    let raw = Table::read_csv(raw_csv)?;
    log::info!("Raw data loaded: {} rows x {} columns", raw.height(), raw.width());

    let tables = wrangle_table(raw)?;

    let full_social_dir = paths.processed_scenario_dir(Scenario::FullSocial);
    for scenario in Scenario::ALL {
        fs::create_dir_all(paths.processed_scenario_dir(scenario))?;
    }

    let outputs: [(PathBuf, &Table); 3] = [
        (paths.base_table(Scenario::NoSocial), &tables.no_social),
        (full_social_dir.join("places_imputed_clean.csv"), &tables.imputed),
        (paths.base_table(Scenario::FullSocial), &tables.imputed_full),
    ];
    for (path, table) in &outputs {
        table.write_csv(path)?;
    }

    for target in Target::ALL {
        let column = target.column();
        if !tables.no_social.contains(column) {
            log::warn!("Target {column} not found, skipping its model data files.");
            continue;
        }
        tables
            .no_social
            .with_leading(column)?
            .write_csv(&paths.model_data(Scenario::NoSocial, target))?;
        tables
            .imputed_full
            .with_leading(column)?
            .write_csv(&paths.model_data(Scenario::FullSocial, target))?;
    }

    let summary: Vec<DatasetSummary> = outputs
        .iter()
        .map(|(path, table)| DatasetSummary {
            dataset: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            rows: table.height(),
            cols: table.width(),
            nulls: table.null_count(),
        })
        .collect();

    let summary_path = paths.processed_dir.join("wrangling_summary.csv");
    let mut writer = csv::Writer::from_path(&summary_path)?;
    for row in &summary {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!("Wrangling summary saved to {}", summary_path.display());

    tables.imputed_full.write_csv(&paths.final_places())?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_table() -> Table {
        let mut t = Table::new();
        t.push(
            "StateAbbr",
            ColumnData::Text(vec![Some("AL".into()), Some("AL".into()), Some("AL".into()), Some("AK".into())]),
        );
        t.push(
            "StateDesc",
            ColumnData::Text(vec![Some("Alabama".into()), Some("Alabama".into()), Some("Alabama".into()), Some("Alaska".into())]),
        );
        t.push(
            "CountyName",
            ColumnData::Text(vec![Some("A".into()), Some("B".into()), Some("C".into()), Some("D".into())]),
        );
        t.push(
            "CountyFIPS",
            ColumnData::Numeric(vec![Some(1001.0), Some(1003.0), Some(1005.0), Some(2013.0)]),
        );
        t.push(
            "TotalPopulation",
            ColumnData::Text(vec![Some("1,000".into()), Some("2000".into()), Some("3000".into()), Some("400".into())]),
        );
        t.push(
            "TotalPop18plus",
            ColumnData::Numeric(vec![Some(800.0), Some(1600.0), Some(2400.0), Some(300.0)]),
        );
        t.push("MHLTH_CrudePrev", ColumnData::Numeric(vec![Some(15.0), Some(16.0), None, Some(14.0)]));
        t.push("DEPRESSION_CrudePrev", ColumnData::Numeric(vec![Some(20.0), Some(21.0), Some(22.0), Some(19.0)]));
        t.push("ISOLATION_CrudePrev", ColumnData::Numeric(vec![Some(10.0), None, Some(14.0), None]));
        t.push("MHLTH_Crude95CI", ColumnData::Text(vec![None, None, None, None]));
        for name in ["HIGHCHOL_CrudePrev", "CHOLSCREEN_CrudePrev", "BPHIGH_CrudePrev"] {
            t.push(name, ColumnData::Numeric(vec![Some(30.0); 4]));
        }
        t.push("BPMED_CrudePrev", ColumnData::Numeric(vec![Some(70.0), Some(71.0), Some(72.0), None]));
        t
    }

    #[test]
    fn normalizes_names_and_pads_fips() {
        assert_eq!(normalize_column_name(" Colon Screen-CrudePrev "), "colon_screen_crudeprev");
        let tables = wrangle_table(raw_table()).unwrap();
        let fips = tables.no_social.text("countyfips").unwrap();
        assert_eq!(fips[0].as_deref(), Some("01001"));
        assert!(!tables.no_social.contains("mhlth_crude95ci"));
        assert_eq!(
            tables.no_social.numeric("totalpopulation").unwrap()[0],
            Some(1000.0)
        );
    }

    #[test]
    fn social_columns_are_dropped_or_state_median_imputed() {
        let tables = wrangle_table(raw_table()).unwrap();
        assert!(!tables.no_social.contains("isolation_crudeprev"));
        // The Alaska row lacks bpmed and is removed from both tables.
        assert_eq!(tables.no_social.height(), 3);
        assert_eq!(tables.imputed.height(), 3);
        assert_eq!(
            tables.imputed.numeric("isolation_crudeprev").unwrap(),
            &[Some(10.0), Some(12.0), Some(14.0)]
        );
    }

    #[test]
    fn full_imputation_uses_column_mean() {
        let tables = wrangle_table(raw_table()).unwrap();
        assert_eq!(tables.imputed.numeric("mhlth_crudeprev").unwrap()[2], None);
        assert_eq!(
            tables.imputed_full.numeric("mhlth_crudeprev").unwrap()[2],
            Some(15.5)
        );
        assert_eq!(tables.imputed_full.null_count(), 0);
    }

    #[test]
    fn missing_meta_column_is_an_error() {
        let raw = raw_table().drop_columns(&["StateDesc"]);
        assert!(matches!(wrangle_table(raw), Err(DataError::ColumnNotFound(c)) if c == "statedesc"));
    }
}
