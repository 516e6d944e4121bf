use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, DatabaseEngine};
use crate::ingest::{parse_timestamp, IngestError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Timestamp => "timestamp",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    SqlServer,
}

impl Dialect {
    pub fn type_name(&self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (Self::Postgres, ColumnType::Integer) => "BIGINT",
            (Self::Postgres, ColumnType::Float) => "NUMERIC",
            (Self::Postgres, ColumnType::Timestamp) => "TIMESTAMP",
            (Self::Postgres, ColumnType::Text) => "TEXT",
            (Self::SqlServer, ColumnType::Integer) => "BIGINT",
            (Self::SqlServer, ColumnType::Float) => "FLOAT",
            (Self::SqlServer, ColumnType::Timestamp) => "DATETIME2",
            (Self::SqlServer, ColumnType::Text) => "NVARCHAR(MAX)",
        }
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Self::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Self::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }
}

impl From<DatabaseEngine> for Dialect {
    fn from(engine: DatabaseEngine) -> Self {
        match engine {
            DatabaseEngine::Postgres => Self::Postgres,
            DatabaseEngine::SqlServer => Self::SqlServer,
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse::<DatabaseEngine>().map(Self::from)
    }
}

/// A cell converted to its column's inferred type. Floats keep their source
/// text so exact-numeric targets see every digit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Float(String),
    Timestamp(NaiveDateTime),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn convert(&self, row: usize, cell: Option<&str>) -> Result<CellValue, IngestError> {
        let Some(raw) = cell else {
            return Ok(CellValue::Null);
        };

        let invalid = || IngestError::InvalidValue {
            row,
            column: self.name.clone(),
            expected: self.column_type,
            value: raw.to_string(),
        };

        match self.column_type {
            ColumnType::Integer => raw.parse::<i64>().map(CellValue::Integer).map_err(|_| invalid()),
            ColumnType::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(|_| CellValue::Float(raw.to_string()))
                .ok_or_else(invalid),
            ColumnType::Timestamp => parse_timestamp(raw).map(CellValue::Timestamp).ok_or_else(invalid),
            ColumnType::Text => Ok(CellValue::Text(raw.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        let table = dialect.quote_identifier(&self.table);
        let columns = self
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    dialect.quote_identifier(&column.name),
                    dialect.type_name(column.column_type)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        match dialect {
            Dialect::Postgres => format!("CREATE TABLE IF NOT EXISTS {table} ({columns})"),
            Dialect::SqlServer => format!(
                "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {table} ({columns})",
                self.table.replace('\'', "''")
            ),
        }
    }

    /// `INSERT INTO <table> (<columns>) ` without the values clause.
    pub fn insert_prefix(&self, dialect: Dialect) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| dialect.quote_identifier(&column.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({columns}) ", dialect.quote_identifier(&self.table))
    }
}
