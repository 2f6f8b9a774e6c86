//! SQLite persistence for county records, model metrics, scenario
//! comparisons and served predictions.
//!
//! The connection sits behind a `Mutex` so a single store can be shared by
//! the prediction service and the ingestion step. Timestamps are stored as
//! RFC 3339 text in UTC.

pub mod ingest;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::pipeline::compare::{BestModel, CompareError};
use crate::pipeline::table::DataError;
use crate::train::estimate::MetricRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("The database connection lock was poisoned by a panicking thread.")]
    LockPoisoned,
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Compare(#[from] CompareError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// County fields accepted by `upsert_place`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlace {
    pub fips: String,
    pub name: String,
    pub state: String,
    pub population: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub year: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaceRecord {
    pub id: i64,
    pub fips: String,
    pub name: String,
    pub state: String,
    pub population: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub year: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsRecord {
    pub id: i64,
    pub model_name: String,
    pub target: String,
    pub dataset_type: String,
    pub r2_score: Option<f64>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparisonRecord {
    pub id: i64,
    pub target: String,
    pub dataset_type: String,
    pub best_model: String,
    pub best_r2: Option<f64>,
    pub best_mae: Option<f64>,
    pub best_rmse: Option<f64>,
    pub comparison_date: DateTime<Utc>,
}

/// A prediction about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub place_id: Option<i64>,
    pub model_used: String,
    pub target: String,
    pub predicted_value: f64,
    pub input_vector: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PredictionRecord {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<i64>,
    pub model_used: String,
    pub target: String,
    pub predicted_value: f64,
    pub input_vector: serde_json::Value,
    pub prediction_date: DateTime<Utc>,
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS place_record (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fips TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        state TEXT NOT NULL,
        population INTEGER,
        latitude REAL,
        longitude REAL,
        year INTEGER NOT NULL DEFAULT 2024,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS model_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model_name TEXT NOT NULL,
        target TEXT NOT NULL,
        dataset_type TEXT NOT NULL DEFAULT 'no_social',
        r2_score REAL,
        mae REAL,
        rmse REAL,
        timestamp TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS comparison_summary (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target TEXT NOT NULL,
        dataset_type TEXT NOT NULL DEFAULT 'no_social',
        best_model TEXT NOT NULL,
        best_r2 REAL,
        best_mae REAL,
        best_rmse REAL,
        comparison_date TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS prediction (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        place_id INTEGER REFERENCES place_record(id) ON DELETE CASCADE,
        model_used TEXT NOT NULL,
        target TEXT NOT NULL,
        predicted_value REAL NOT NULL,
        input_vector TEXT NOT NULL,
        prediction_date TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_metrics_lookup
        ON model_metrics(target, dataset_type, timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_prediction_date
        ON prediction(prediction_date DESC);
";

/// Fixed-width so text ordering matches time ordering.
fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn place_from_row(row: &Row<'_>) -> rusqlite::Result<PlaceRecord> {
    Ok(PlaceRecord {
        id: row.get(0)?,
        fips: row.get(1)?,
        name: row.get(2)?,
        state: row.get(3)?,
        population: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        year: row.get(7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn metrics_from_row(row: &Row<'_>) -> rusqlite::Result<MetricsRecord> {
    Ok(MetricsRecord {
        id: row.get(0)?,
        model_name: row.get(1)?,
        target: row.get(2)?,
        dataset_type: row.get(3)?,
        r2_score: row.get(4)?,
        mae: row.get(5)?,
        rmse: row.get(6)?,
        timestamp: timestamp(row, 7)?,
    })
}

fn comparison_from_row(row: &Row<'_>) -> rusqlite::Result<ComparisonRecord> {
    Ok(ComparisonRecord {
        id: row.get(0)?,
        target: row.get(1)?,
        dataset_type: row.get(2)?,
        best_model: row.get(3)?,
        best_r2: row.get(4)?,
        best_mae: row.get(5)?,
        best_rmse: row.get(6)?,
        comparison_date: timestamp(row, 7)?,
    })
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<PredictionRecord> {
    let input: String = row.get(5)?;
    let input_vector = serde_json::from_str(&input)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(PredictionRecord {
        id: row.get(0)?,
        place_id: row.get(1)?,
        model_used: row.get(2)?,
        target: row.get(3)?,
        predicted_value: row.get(4)?,
        input_vector,
        prediction_date: timestamp(row, 6)?,
    })
}

const PLACE_COLUMNS: &str =
    "id, fips, name, state, population, latitude, longitude, year, created_at, updated_at";
const METRICS_COLUMNS: &str = "id, model_name, target, dataset_type, r2_score, mae, rmse, timestamp";
const COMPARISON_COLUMNS: &str =
    "id, target, dataset_type, best_model, best_r2, best_mae, best_rmse, comparison_date";
const PREDICTION_COLUMNS: &str =
    "id, place_id, model_used, target, predicted_value, input_vector, prediction_date";

pub struct CityMindStore {
    conn: Mutex<Connection>,
}

impl CityMindStore {
    /// Opens (creating if needed) the database file and its tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // --- place_record ---

    /// Inserts a county or refreshes the one with the same FIPS code.
    /// Returns the row id.
    pub fn upsert_place(&self, place: &NewPlace) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Self::upsert_place_with(&conn, place, &now_text())
    }

    /// Upserts many counties in one transaction.
    pub fn upsert_places(&self, places: &[NewPlace]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_text();
        for place in places {
            Self::upsert_place_with(&tx, place, &now)?;
        }
        tx.commit()?;
        Ok(places.len())
    }

    fn upsert_place_with(conn: &Connection, place: &NewPlace, now: &str) -> Result<i64, StoreError> {
        conn.execute(
            r"
            INSERT INTO place_record (
                fips, name, state, population, latitude, longitude, year, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(fips) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                population = excluded.population,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                year = excluded.year,
                updated_at = excluded.updated_at
            ",
            params![
                place.fips,
                place.name,
                place.state,
                place.population,
                place.latitude,
                place.longitude,
                place.year,
                now,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM place_record WHERE fips = ?1",
            params![place.fips],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_place(&self, fips: &str) -> Result<Option<PlaceRecord>, StoreError> {
        let conn = self.conn()?;
        let place = conn
            .query_row(
                &format!("SELECT {PLACE_COLUMNS} FROM place_record WHERE fips = ?1"),
                params![fips],
                place_from_row,
            )
            .optional()?;
        Ok(place)
    }

    /// Counties ordered by state, then name.
    pub fn list_places(&self) -> Result<Vec<PlaceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLACE_COLUMNS} FROM place_record ORDER BY state, name"
        ))?;
        let places = stmt
            .query_map([], place_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(places)
    }

    pub fn count_places(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM place_record", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn delete_place(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM place_record WHERE id = ?1", params![id])? > 0)
    }

    // --- model_metrics ---

    pub fn insert_metrics(&self, record: &MetricRecord, dataset_type: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO model_metrics (model_name, target, dataset_type, r2_score, mae, rmse, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                record.model,
                record.target,
                dataset_type,
                record.r2,
                record.mae,
                record.rmse,
                now_text(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Metrics ordered by target, then model name.
    pub fn list_metrics(&self) -> Result<Vec<MetricsRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {METRICS_COLUMNS} FROM model_metrics ORDER BY target, model_name"
        ))?;
        let rows = stmt
            .query_map([], metrics_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The `limit` most recently stored metric rows, newest first.
    pub fn latest_metrics(&self, limit: usize) -> Result<Vec<MetricsRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {METRICS_COLUMNS} FROM model_metrics ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], metrics_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Newest metrics whose model name contains `model` (case-insensitive).
    pub fn latest_metric_for(
        &self,
        model: &str,
        target: &str,
        dataset_type: &str,
    ) -> Result<Option<MetricsRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {METRICS_COLUMNS} FROM model_metrics
                     WHERE model_name LIKE '%' || ?1 || '%' AND target = ?2 AND dataset_type = ?3
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![model, target, dataset_type],
                metrics_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Mean R2 over a dataset type for models whose name contains `model`.
    pub fn average_r2(&self, dataset_type: &str, model: &str) -> Result<Option<f64>, StoreError> {
        let conn = self.conn()?;
        let avg = conn.query_row(
            "SELECT AVG(r2_score) FROM model_metrics
             WHERE dataset_type = ?1 AND model_name LIKE '%' || ?2 || '%'",
            params![dataset_type, model],
            |row| row.get::<_, Option<f64>>(0),
        )?;
        Ok(avg)
    }

    pub fn delete_metrics(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM model_metrics WHERE id = ?1", params![id])? > 0)
    }

    // --- comparison_summary ---

    pub fn insert_comparison(&self, best: &BestModel) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO comparison_summary (
                target, dataset_type, best_model, best_r2, best_mae, best_rmse, comparison_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                best.target,
                best.dataset_type,
                best.best_model,
                best.best_r2,
                best.best_mae,
                best.best_rmse,
                now_text(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest comparison row of every (target, dataset type) pair.
    pub fn latest_comparison(&self) -> Result<Vec<ComparisonRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMPARISON_COLUMNS} FROM comparison_summary c
             WHERE id = (
                 SELECT id FROM comparison_summary
                 WHERE target = c.target AND dataset_type = c.dataset_type
                 ORDER BY comparison_date DESC, id DESC LIMIT 1
             )
             ORDER BY target, dataset_type"
        ))?;
        let rows = stmt
            .query_map([], comparison_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_comparison(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM comparison_summary WHERE id = ?1", params![id])? > 0)
    }

    // --- prediction ---

    pub fn insert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionRecord, StoreError> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            r"
            INSERT INTO prediction (
                place_id, model_used, target, predicted_value, input_vector, prediction_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                prediction.place_id,
                prediction.model_used,
                prediction.target,
                prediction.predicted_value,
                prediction.input_vector.to_string(),
                now.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        let id = conn.last_insert_rowid();
        log::debug!("Stored prediction {id} ({})", prediction.target);
        Ok(PredictionRecord {
            id,
            place_id: prediction.place_id,
            model_used: prediction.model_used.clone(),
            target: prediction.target.clone(),
            predicted_value: prediction.predicted_value,
            input_vector: prediction.input_vector.clone(),
            prediction_date: now,
        })
    }

    pub fn latest_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM prediction
             ORDER BY prediction_date DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], prediction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_predictions(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prediction", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn delete_prediction(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM prediction WHERE id = ?1", params![id])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn place(fips: &str, name: &str) -> NewPlace {
        NewPlace {
            fips: fips.into(),
            name: name.into(),
            state: "Alabama".into(),
            population: Some(58_000),
            latitude: None,
            longitude: None,
            year: 2024,
        }
    }

    fn metric(model: &str, target: &str, r2: f64) -> MetricRecord {
        MetricRecord {
            target: target.into(),
            model: model.into(),
            r2,
            rmse: 1.0,
            mae: 0.8,
            pca_components: 10,
        }
    }

    #[test]
    fn upsert_keeps_fips_unique() {
        let store = CityMindStore::in_memory().unwrap();
        let first = store.upsert_place(&place("01001", "Autauga")).unwrap();
        let again = store.upsert_place(&place("01001", "Autauga County")).unwrap();
        assert_eq!(first, again);
        store.upsert_places(&[place("01003", "Baldwin"), place("01005", "Barbour")]).unwrap();
        assert_eq!(store.count_places().unwrap(), 3);
        assert_eq!(store.get_place("01001").unwrap().unwrap().name, "Autauga County");
        let names: Vec<String> = store.list_places().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Autauga County", "Baldwin", "Barbour"]);
        assert!(store.delete_place(first).unwrap());
        assert!(!store.delete_place(first).unwrap());
        assert!(store.get_place("01001").unwrap().is_none());
    }

    #[test]
    fn metric_lookup_matches_model_substring() {
        let store = CityMindStore::in_memory().unwrap();
        store.insert_metrics(&metric("LassoCV", "mhlth_crudeprev", 0.4), "no_social").unwrap();
        store.insert_metrics(&metric("GradientBoosting", "mhlth_crudeprev", 0.6), "no_social").unwrap();
        let newest = store
            .insert_metrics(&metric("GradientBoosting", "mhlth_crudeprev", 0.8), "full_social")
            .unwrap();

        let found = store
            .latest_metric_for("boost", "mhlth_crudeprev", "full_social")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newest);
        assert_eq!(found.r2_score, Some(0.8));
        assert!(store.latest_metric_for("Forest", "mhlth_crudeprev", "no_social").unwrap().is_none());

        assert_eq!(store.average_r2("no_social", "").unwrap(), Some(0.5));
        assert_eq!(store.average_r2("full_social", "Lasso").unwrap(), None);
        assert_eq!(store.latest_metrics(2).unwrap()[0].id, newest);
        assert_eq!(store.list_metrics().unwrap().len(), 3);
        assert!(store.delete_metrics(newest).unwrap());
    }

    #[test]
    fn latest_comparison_per_pair() {
        let store = CityMindStore::in_memory().unwrap();
        let best = |model: &str, dataset: &str, r2: f64| BestModel {
            target: "depression_crudeprev".into(),
            dataset_type: dataset.into(),
            best_model: model.into(),
            best_r2: r2,
            best_mae: 0.5,
            best_rmse: 0.7,
        };
        store.insert_comparison(&best("LassoCV", "no_social", 0.3)).unwrap();
        store.insert_comparison(&best("RandomForest", "no_social", 0.4)).unwrap();
        store.insert_comparison(&best("GradientBoosting", "full_social", 0.6)).unwrap();
        let latest = store.latest_comparison().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].dataset_type, "full_social");
        assert_eq!(latest[1].best_model, "RandomForest");
        assert!(store.delete_comparison(latest[0].id).unwrap());
    }

    #[test]
    fn predictions_round_trip_json_and_cascade() {
        let store = CityMindStore::in_memory().unwrap();
        let place_id = store.upsert_place(&place("01001", "Autauga")).unwrap();
        let input = json!({"target": "mhlth_crudeprev", "smoking": 0.3});
        let stored = store
            .insert_prediction(&NewPrediction {
                place_id: Some(place_id),
                model_used: "GradientBoosting".into(),
                target: "mhlth_crudeprev".into(),
                predicted_value: 17.25,
                input_vector: input.clone(),
            })
            .unwrap();
        store
            .insert_prediction(&NewPrediction {
                place_id: None,
                model_used: "GradientBoosting".into(),
                target: "depression_crudeprev".into(),
                predicted_value: 21.0,
                input_vector: json!({}),
            })
            .unwrap();

        let latest = store.latest_predictions(5).unwrap();
        assert_eq!(latest.len(), 2);
        let first = latest.iter().find(|p| p.id == stored.id).unwrap();
        assert_eq!(first.input_vector, input);
        assert_eq!(first.place_id, Some(place_id));

        store.delete_place(place_id).unwrap();
        assert_eq!(store.count_predictions().unwrap(), 1);
    }

    #[test]
    fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("citymind.sqlite3");
        {
            let store = CityMindStore::open(&path).unwrap();
            store.upsert_place(&place("01001", "Autauga")).unwrap();
        }
        let reopened = CityMindStore::open(&path).unwrap();
        assert_eq!(reopened.count_places().unwrap(), 1);
    }
}
