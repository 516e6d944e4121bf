//! CSV reading and column type inference for table seeding.
//!
//! Inference looks at non-empty cells only and picks the narrowest type every
//! cell parses as: integer, then float, then timestamp, falling back to text.

pub mod schema;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

pub use schema::{CellValue, ColumnSchema, ColumnType, Dialect, TableSchema};

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not open `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV input has no header row")]
    MissingHeader,
    #[error("column `{column}` appears more than once after normalisation")]
    DuplicateColumn { column: String },
    #[error("row {row}: column `{column}` expected {expected} but found `{value}`")]
    InvalidValue { row: usize, column: String, expected: ColumnType, value: String },
}

/// Rows read from a CSV file. Empty cells are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows.iter().map(move |row| row.get(index).and_then(|cell| cell.as_deref()))
    }
}

pub fn read_csv(path: &Path, max_rows: usize) -> Result<CsvTable, IngestError> {
    let file =
        File::open(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
    read_csv_from(file, max_rows)
}

pub fn read_csv_from<R: Read>(reader: R, max_rows: usize) -> Result<CsvTable, IngestError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(IngestError::MissingHeader);
    }

    let mut seen = BTreeSet::new();
    let mut columns = Vec::with_capacity(headers.len());
    for (index, raw) in headers.iter().enumerate() {
        let mut name = normalize_column_name(raw);
        if name.is_empty() {
            name = format!("column_{}", index + 1);
        }
        if !seen.insert(name.clone()) {
            return Err(IngestError::DuplicateColumn { column: name });
        }
        columns.push(name);
    }

    let mut rows = Vec::new();
    for record in reader.records().take(max_rows) {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                .collect::<Vec<_>>(),
        );
    }

    Ok(CsvTable { columns, rows })
}

/// Spaces become underscores and the name is lower-cased.
pub fn normalize_column_name(raw: &str) -> String {
    raw.trim().replace(' ', "_").to_lowercase()
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub fn infer_column_type<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> ColumnType {
    let present = values.into_iter().flatten().filter(|value| !value.is_empty()).collect::<Vec<_>>();
    if present.is_empty() {
        return ColumnType::Text;
    }

    if present.iter().all(|value| value.parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else if present
        .iter()
        .all(|value| value.parse::<f64>().map(|parsed| parsed.is_finite()).unwrap_or(false))
    {
        ColumnType::Float
    } else if present.iter().all(|value| parse_timestamp(value).is_some()) {
        ColumnType::Timestamp
    } else {
        ColumnType::Text
    }
}

pub fn infer_schema(table: &str, data: &CsvTable) -> TableSchema {
    let columns = data
        .columns
        .iter()
        .enumerate()
        .map(|(index, name)| ColumnSchema {
            name: name.clone(),
            column_type: infer_column_type(data.column_values(index)),
        })
        .collect();

    TableSchema { table: table.to_string(), columns }
}
