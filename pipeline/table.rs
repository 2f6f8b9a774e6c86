//! # In-Memory County Tables
//!
//! The wrangling and selection steps work on a small columnar table: every
//! column is either free text or nullable `f64`. Files are read and written
//! with `polars`, and the null-handling transforms (row filters, group
//! median and mean imputation) run as lazy `polars` queries over the same
//! columns.

use ahash::AHashSet;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for table loading, validation and writing.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Input file '{0}' does not exist.")]
    FileNotFound(String),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Input file contains only {found} usable rows, but at least {required} are needed."
    )]
    InsufficientRows { found: usize, required: usize },
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'."
    )]
    NonFiniteValuesFound(String),
    #[error("No numeric feature columns remain besides the target '{0}'.")]
    NoFeatureColumns(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    Numeric(Vec<Option<f64>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.len(),
            ColumnData::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub data: ColumnData,
}

/// An ordered set of equally long, uniquely named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<TableColumn>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column, or replaces an existing one with the same name in place.
    pub fn push(&mut self, name: impl Into<String>, data: ColumnData) {
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.data = data,
            None => self.columns.push(TableColumn { name, data }),
        }
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    pub fn numeric(&self, name: &str) -> Result<&[Option<f64>], DataError> {
        match self.column(name) {
            Some(ColumnData::Numeric(v)) => Ok(v),
            Some(ColumnData::Text(_)) => Err(DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: "text".to_string(),
            }),
            None => Err(DataError::ColumnNotFound(name.to_string())),
        }
    }

    pub fn numeric_mut(&mut self, name: &str) -> Result<&mut Vec<Option<f64>>, DataError> {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(TableColumn {
                data: ColumnData::Numeric(v),
                ..
            }) => Ok(v),
            Some(_) => Err(DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: "text".to_string(),
            }),
            None => Err(DataError::ColumnNotFound(name.to_string())),
        }
    }

    pub fn text(&self, name: &str) -> Result<&[Option<String>], DataError> {
        match self.column(name) {
            Some(ColumnData::Text(v)) => Ok(v),
            Some(ColumnData::Numeric(_)) => Err(DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "text",
                found_type: "f64".to_string(),
            }),
            None => Err(DataError::ColumnNotFound(name.to_string())),
        }
    }

    /// Names of all numeric columns, in table order.
    pub fn numeric_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| matches!(c.data, ColumnData::Numeric(_)))
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn rename_columns(&mut self, f: impl Fn(&str) -> String) {
        for column in &mut self.columns {
            column.name = f(&column.name);
        }
    }

    /// Drops later columns whose name repeats an earlier one.
    pub fn dedup_columns(&mut self) -> Vec<String> {
        let mut seen = AHashSet::new();
        let mut dropped = Vec::new();
        self.columns.retain(|c| {
            if seen.insert(c.name.clone()) {
                true
            } else {
                dropped.push(c.name.clone());
                false
            }
        });
        dropped
    }

    /// A new table with exactly `names`, in that order.
    pub fn select(&self, names: &[&str]) -> Result<Table, DataError> {
        let mut out = Table::new();
        for &name in names {
            let data = self
                .column(name)
                .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?;
            out.push(name, data.clone());
        }
        Ok(out)
    }

    /// A copy without the named columns; absent names are ignored.
    pub fn drop_columns(&self, names: &[&str]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Same columns, with `first` moved to the front.
    pub fn with_leading(&self, first: &str) -> Result<Table, DataError> {
        let mut order: Vec<&str> = vec![first];
        order.extend(self.names().into_iter().filter(|&n| n != first));
        self.select(&order)
    }

    fn require(&self, names: &[&str]) -> Result<(), DataError> {
        match names.iter().find(|&&n| !self.contains(n)) {
            Some(missing) => Err(DataError::ColumnNotFound(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Removes rows that are null in any of `subset`.
    pub fn drop_null_rows(&self, subset: &[&str]) -> Result<Table, DataError> {
        self.require(subset)?;
        let Some(keep) = subset
            .iter()
            .map(|&name| col(name).is_not_null())
            .reduce(|a, b| a.and(b))
        else {
            return Ok(self.clone());
        };
        let df = self.to_frame()?.lazy().filter(keep).collect()?;
        Table::from_frame(&df)
    }

    /// Fills nulls in `columns` with the median of the row's `group`. Rows
    /// without a group, and groups with no observed value, stay null.
    pub fn fill_nulls_with_group_median(&self, columns: &[&str], group: &str) -> Result<Table, DataError> {
        self.require(columns)?;
        self.require(&[group])?;
        let fills: Vec<Expr> = columns
            .iter()
            .map(|&name| {
                when(col(group).is_not_null())
                    .then(col(name).fill_null(col(name).median().over([col(group)])))
                    .otherwise(col(name))
                    .alias(name)
            })
            .collect();
        let df = self.to_frame()?.lazy().with_columns(fills).collect()?;
        Table::from_frame(&df)
    }

    /// Fills nulls in `columns` with the mean of each column.
    pub fn fill_nulls_with_mean(&self, columns: &[&str]) -> Result<Table, DataError> {
        self.require(columns)?;
        let fills: Vec<Expr> = columns
            .iter()
            .map(|&name| col(name).fill_null(col(name).mean()).alias(name))
            .collect();
        let df = self.to_frame()?.lazy().with_columns(fills).collect()?;
        Table::from_frame(&df)
    }

    pub fn null_count(&self) -> usize {
        self.columns.iter().map(|c| c.data.null_count()).sum()
    }

    /// Turns a text column into a numeric one. Thousands separators are
    /// stripped; values that still do not parse become null.
    pub fn coerce_numeric(&mut self, name: &str) -> Result<(), DataError> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?;
        if let ColumnData::Text(values) = &column.data {
            let parsed = values
                .iter()
                .map(|v| v.as_deref().and_then(parse_number))
                .collect();
            column.data = ColumnData::Numeric(parsed);
        }
        Ok(())
    }

    /// Turns a numeric column into text. Integral values print without a
    /// fractional part.
    pub fn coerce_text(&mut self, name: &str) -> Result<(), DataError> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?;
        if let ColumnData::Numeric(values) = &column.data {
            let text = values
                .iter()
                .map(|v| {
                    v.map(|x| {
                        if x.fract() == 0.0 {
                            format!("{}", x as i64)
                        } else {
                            x.to_string()
                        }
                    })
                })
                .collect();
            column.data = ColumnData::Text(text);
        }
        Ok(())
    }

    /// Copies a polars frame: string columns stay text, everything else is
    /// cast to `f64`.
    pub fn from_frame(df: &DataFrame) -> Result<Table, DataError> {
        let mut table = Table::new();
        for column in df.get_columns() {
            let name = column.name().to_string();
            let data = if matches!(column.dtype(), DataType::String) {
                let values = column.str()?;
                ColumnData::Text(values.into_iter().map(|v| v.map(str::to_string)).collect())
            } else {
                let casted = column.cast(&DataType::Float64).map_err(|_| {
                    DataError::ColumnWrongType {
                        column_name: name.clone(),
                        expected_type: "f64 (numeric)",
                        found_type: format!("{:?}", column.dtype()),
                    }
                })?;
                ColumnData::Numeric(casted.f64()?.into_iter().collect())
            };
            table.push(name, data);
        }
        Ok(table)
    }

    /// The same columns as a polars frame.
    pub fn to_frame(&self) -> Result<DataFrame, DataError> {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|c| match &c.data {
                ColumnData::Text(v) => Series::new(c.name.as_str().into(), v).into(),
                ColumnData::Numeric(v) => Series::new(c.name.as_str().into(), v).into(),
            })
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    /// Reads a comma-separated file with a header row. Every row is used for
    /// type inference so late thousands-separated values do not break parsing.
    pub fn read_csv(path: &Path) -> Result<Table, DataError> {
        if !path.exists() {
            return Err(DataError::FileNotFound(path.display().to_string()));
        }
        log::debug!("Loading table from '{}'", path.display());

        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None),
            )
            .finish()?;

        let table = Table::from_frame(&df)?;
        log::debug!(
            "Loaded {} rows x {} columns from '{}'",
            table.height(),
            table.width(),
            path.display()
        );
        Ok(table)
    }

    /// Writes the table as CSV, creating parent directories as needed.
    pub fn write_csv(&self, path: &Path) -> Result<(), DataError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut df = self.to_frame()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        log::info!(
            "Saved {} ({} rows x {} columns)",
            path.display(),
            self.height(),
            self.width()
        );
        Ok(())
    }
}

/// Parses a number that may carry thousands separators ("1,234.5").
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|&c| c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Mean over the non-null values, or `None` if there are none.
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample() -> Table {
        let mut t = Table::new();
        t.push(
            "state",
            ColumnData::Text(vec![Some("AL".into()), Some("AK".into()), None]),
        );
        t.push("a", ColumnData::Numeric(vec![Some(1.0), None, Some(3.0)]));
        t.push("b", ColumnData::Numeric(vec![Some(4.0), Some(5.0), Some(6.0)]));
        t
    }

    #[test]
    fn drop_null_rows_respects_subset() {
        let t = sample();
        assert_eq!(t.drop_null_rows(&["b"]).unwrap().height(), 3);
        let filtered = t.drop_null_rows(&["a"]).unwrap();
        assert_eq!(filtered.numeric("b").unwrap(), &[Some(4.0), Some(6.0)]);
        assert!(matches!(
            t.drop_null_rows(&["missing"]),
            Err(DataError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn group_median_fills_within_each_group() {
        let mut t = Table::new();
        t.push(
            "state",
            ColumnData::Text(
                ["AL", "AL", "AL", "AL", "AK", "AK", "AZ"]
                    .iter()
                    .map(|s| Some(s.to_string()))
                    .chain([None])
                    .collect(),
            ),
        );
        t.push(
            "x",
            ColumnData::Numeric(vec![Some(1.0), Some(2.0), Some(10.0), None, None, Some(7.0), None, None]),
        );
        let filled = t.fill_nulls_with_group_median(&["x"], "state").unwrap();
        assert_eq!(
            filled.numeric("x").unwrap(),
            &[Some(1.0), Some(2.0), Some(10.0), Some(2.0), Some(7.0), Some(7.0), None, None]
        );
        assert_eq!(filled.names(), vec!["state", "x"]);
        assert!(matches!(
            t.fill_nulls_with_group_median(&["x"], "county"),
            Err(DataError::ColumnNotFound(c)) if c == "county"
        ));
    }

    #[test]
    fn mean_fill_leaves_other_columns_alone() {
        let filled = sample().fill_nulls_with_mean(&["a"]).unwrap();
        assert_eq!(filled.numeric("a").unwrap(), &[Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(filled.text("state").unwrap()[2], None);
        assert_eq!(filled, {
            let mut t = sample();
            t.numeric_mut("a").unwrap()[1] = Some(2.0);
            t
        });
    }

    #[test]
    fn with_leading_moves_column_first() {
        let t = sample().with_leading("b").unwrap();
        assert_eq!(t.names(), vec!["b", "state", "a"]);
    }

    #[test]
    fn mean_skips_nulls() {
        assert_eq!(mean(&[Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(mean(&[None]), None);
    }

    #[test]
    fn thousands_separators_are_parsed() {
        assert_eq!(parse_number("1,234"), Some(1234.0));
        assert_eq!(parse_number("  "), None);
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn csv_round_trip_preserves_nulls_and_text() {
        let mut input = NamedTempFile::new().unwrap();
        writeln!(input, "state,a,b\nAL,1.5,\"1,000\"\nAK,,2000").unwrap();
        input.flush().unwrap();

        let mut table = Table::read_csv(input.path()).unwrap();
        assert_eq!(table.height(), 2);
        table.coerce_numeric("b").unwrap();
        assert_eq!(table.numeric("b").unwrap(), &[Some(1000.0), Some(2000.0)]);
        assert_eq!(table.numeric("a").unwrap(), &[Some(1.5), None]);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out.csv");
        table.write_csv(&out).unwrap();
        let back = Table::read_csv(&out).unwrap();
        assert_eq!(back.text("state").unwrap()[1].as_deref(), Some("AK"));
        assert_eq!(back.numeric("a").unwrap()[1], None);
    }
}
