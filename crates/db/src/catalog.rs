use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use uuid::Uuid;

use crate::DbPool;

const SEPARATOR: &str = ", ";

/// Result of an ad-hoc statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryOutput {
    Rows { columns: Vec<String>, rows: Vec<Vec<String>> },
    Affected(u64),
}

impl QueryOutput {
    pub fn render(&self) -> String {
        match self {
            Self::Rows { columns, rows } => {
                let mut lines = Vec::with_capacity(rows.len() + 1);
                lines.push(columns.join(SEPARATOR));
                lines.extend(rows.iter().map(|row| row.join(SEPARATOR)));
                lines.join("\n")
            }
            Self::Affected(count) => {
                format!("Query executed successfully. {count} rows affected.")
            }
        }
    }
}

pub async fn list_databases(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT datname::text FROM pg_database WHERE datistemplate = false ORDER BY datname",
    )
    .fetch_all(pool)
    .await
}

pub async fn list_tables(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables \
         WHERE table_schema = 'public' ORDER BY table_name",
    )
    .fetch_all(pool)
    .await
}

/// Statements that describe result columns are fetched and rendered; all
/// others report the affected row count.
pub async fn execute_query(pool: &DbPool, sql: &str) -> Result<QueryOutput, sqlx::Error> {
    let statement = pool.prepare(sql).await?;
    if statement.columns().is_empty() {
        let result = sqlx::query(sql).execute(pool).await?;
        return Ok(QueryOutput::Affected(result.rows_affected()));
    }

    let columns =
        statement.columns().iter().map(|column| column.name().to_string()).collect::<Vec<_>>();
    let fetched = sqlx::query(sql).fetch_all(pool).await?;
    let rows = fetched
        .iter()
        .map(|row| (0..columns.len()).map(|index| render_cell(row, index)).collect())
        .collect::<Result<Vec<Vec<String>>, _>>()?;
    Ok(QueryOutput::Rows { columns, rows })
}

fn render_cell(row: &PgRow, index: usize) -> Result<String, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok("NULL".to_string());
    }
    let type_name = raw.type_info().name().to_string();

    let rendered = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index)?.to_string(),
        "INT2" => row.try_get::<i16, _>(index)?.to_string(),
        "INT4" => row.try_get::<i32, _>(index)?.to_string(),
        "INT8" => row.try_get::<i64, _>(index)?.to_string(),
        "FLOAT4" => row.try_get::<f32, _>(index)?.to_string(),
        "FLOAT8" => row.try_get::<f64, _>(index)?.to_string(),
        // Decimal holds 28 significant digits; cast with `::text` for wider values.
        "NUMERIC" => row
            .try_get::<Decimal, _>(index)
            .map(|value| value.to_string())
            .unwrap_or_else(|_| "<NUMERIC out of range>".to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<String, _>(index)?,
        "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index)?.to_string(),
        "TIMESTAMPTZ" => row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339(),
        "DATE" => row.try_get::<NaiveDate, _>(index)?.to_string(),
        "UUID" => row.try_get::<Uuid, _>(index)?.to_string(),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?.to_string(),
        other => format!("<{other}>"),
    };
    Ok(rendered)
}
