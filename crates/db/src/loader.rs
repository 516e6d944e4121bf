use std::path::Path;

use chrono::NaiveDateTime;
use dbbuddy_core::config::DatabaseEngine;
use dbbuddy_core::ingest::{
    infer_schema, read_csv, CellValue, ColumnSchema, ColumnType, CsvTable, Dialect, IngestError,
    TableSchema,
};
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;
use tiberius::ToSql;
use tracing::{debug, info, warn};

use crate::sqlserver::SqlServerClient;
use crate::DbPool;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
/// SQL Server allows 2100 parameters per request and 1000 rows per `VALUES`.
const SQLSERVER_MAX_PARAMS: usize = 2_099;
const SQLSERVER_MAX_ROWS: usize = 1_000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("SQL Server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("row {row}: column `{column}` value `{value}` cannot be bound as {expected}")]
    Conversion { row: usize, column: String, expected: ColumnType, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadReport {
    pub table: String,
    pub columns: usize,
    pub rows_read: usize,
    pub rows_inserted: u64,
    pub batches: usize,
}

/// Where seed rows go.
pub enum SeedTarget<'a> {
    Postgres(&'a DbPool),
    SqlServer(&'a mut SqlServerClient),
}

impl SeedTarget<'_> {
    pub fn engine(&self) -> DatabaseEngine {
        match self {
            Self::Postgres(_) => DatabaseEngine::Postgres,
            Self::SqlServer(_) => DatabaseEngine::SqlServer,
        }
    }
}

/// Floats stay text for Postgres and are cast to `NUMERIC` server side.
#[derive(Clone, Debug, PartialEq)]
enum BindValue {
    Integer(Option<i64>),
    Numeric(Option<String>),
    Timestamp(Option<NaiveDateTime>),
    Text(Option<String>),
}

#[derive(Clone, Debug, PartialEq)]
enum SqlServerValue {
    Integer(Option<i64>),
    Float(Option<f64>),
    Timestamp(Option<NaiveDateTime>),
    Text(Option<String>),
}

impl SqlServerValue {
    fn as_param(&self) -> &dyn ToSql {
        match self {
            Self::Integer(value) => value,
            Self::Float(value) => value,
            Self::Timestamp(value) => value,
            Self::Text(value) => value,
        }
    }
}

/// Reads up to `max_rows` rows of `path`, infers the table schema and loads it.
pub async fn seed_from_csv(
    target: SeedTarget<'_>,
    table: &str,
    path: &Path,
    max_rows: usize,
    batch_size: usize,
) -> Result<LoadReport, LoadError> {
    let data = read_csv(path, max_rows)?;
    let schema = infer_schema(table, &data);
    info!(
        event_name = "seed.schema_inferred",
        engine = %target.engine(),
        table = table,
        path = %path.display(),
        columns = schema.columns.len(),
        rows = data.rows.len(),
        "inferred seed table schema"
    );
    load_table(target, &schema, &data, batch_size).await
}

/// Creates the table when absent and inserts every row in one transaction.
/// All cells are converted before the first statement runs.
pub async fn load_table(
    target: SeedTarget<'_>,
    schema: &TableSchema,
    data: &CsvTable,
    batch_size: usize,
) -> Result<LoadReport, LoadError> {
    let engine = target.engine();
    let (inserted, batches) = match target {
        SeedTarget::Postgres(pool) => {
            let rows = typed_rows(schema, data)?;
            load_postgres(pool, schema, &rows, batch_size).await?
        }
        SeedTarget::SqlServer(client) => {
            let rows = sqlserver_rows(schema, data)?;
            load_sqlserver(client, schema, &rows, batch_size).await?
        }
    };

    info!(
        event_name = "seed.loaded",
        engine = %engine,
        table = %schema.table,
        rows_inserted = inserted,
        batches = batches,
        "seed data committed"
    );

    Ok(LoadReport {
        table: schema.table.clone(),
        columns: schema.columns.len(),
        rows_read: data.rows.len(),
        rows_inserted: inserted,
        batches,
    })
}

async fn load_postgres(
    pool: &DbPool,
    schema: &TableSchema,
    rows: &[Vec<BindValue>],
    batch_size: usize,
) -> Result<(u64, usize), LoadError> {
    let batch = effective_batch_size(batch_size, schema.columns.len());
    sqlx::query(&schema.create_table_sql(Dialect::Postgres)).execute(pool).await?;

    let mut transaction = pool.begin().await?;
    let mut inserted = 0_u64;
    let mut batches = 0_usize;
    if !schema.columns.is_empty() {
        for chunk in rows.chunks(batch) {
            let mut builder =
                QueryBuilder::<Postgres>::new(schema.insert_prefix(Dialect::Postgres));
            builder.push_values(chunk, |mut row, values| {
                for value in values {
                    match value {
                        BindValue::Integer(value) => row.push_bind(*value),
                        BindValue::Numeric(value) => {
                            row.push_bind(value.clone()).push_unseparated("::numeric")
                        }
                        BindValue::Timestamp(value) => row.push_bind(*value),
                        BindValue::Text(value) => row.push_bind(value.clone()),
                    };
                }
            });
            let result = builder.build().execute(&mut *transaction).await?;
            inserted += result.rows_affected();
            batches += 1;
            debug!(
                event_name = "seed.batch_inserted",
                table = %schema.table,
                batch = batches,
                rows = chunk.len(),
                "inserted batch"
            );
        }
    }
    transaction.commit().await?;
    Ok((inserted, batches))
}

async fn load_sqlserver(
    client: &mut SqlServerClient,
    schema: &TableSchema,
    rows: &[Vec<SqlServerValue>],
    batch_size: usize,
) -> Result<(u64, usize), LoadError> {
    client.execute(schema.create_table_sql(Dialect::SqlServer), &[]).await?;

    client.simple_query("BEGIN TRANSACTION").await?.into_results().await?;
    match insert_sqlserver_batches(client, schema, rows, batch_size).await {
        Ok(totals) => {
            client.simple_query("COMMIT TRANSACTION").await?.into_results().await?;
            Ok(totals)
        }
        Err(error) => {
            if let Err(rollback) = rollback_sqlserver(client).await {
                warn!(
                    event_name = "seed.rollback_failed",
                    table = %schema.table,
                    error = %rollback,
                    "rollback after failed insert did not complete"
                );
            }
            Err(error)
        }
    }
}

async fn rollback_sqlserver(client: &mut SqlServerClient) -> Result<(), tiberius::error::Error> {
    client.simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await?.into_results().await?;
    Ok(())
}

async fn insert_sqlserver_batches(
    client: &mut SqlServerClient,
    schema: &TableSchema,
    rows: &[Vec<SqlServerValue>],
    batch_size: usize,
) -> Result<(u64, usize), LoadError> {
    let columns = schema.columns.len();
    if columns == 0 {
        return Ok((0, 0));
    }

    let batch = sqlserver_batch_size(batch_size, columns);
    let prefix = schema.insert_prefix(Dialect::SqlServer);
    let mut inserted = 0_u64;
    let mut batches = 0_usize;
    for chunk in rows.chunks(batch) {
        let statement = format!("{prefix}VALUES {}", sqlserver_placeholders(chunk.len(), columns));
        let params = chunk.iter().flatten().map(SqlServerValue::as_param).collect::<Vec<_>>();
        let result = client.execute(statement, &params).await?;
        inserted += result.total();
        batches += 1;
        debug!(
            event_name = "seed.batch_inserted",
            table = %schema.table,
            batch = batches,
            rows = chunk.len(),
            "inserted batch"
        );
    }
    Ok((inserted, batches))
}

fn effective_batch_size(requested: usize, columns: usize) -> usize {
    requested.clamp(1, (MAX_BIND_PARAMS / columns.max(1)).max(1))
}

fn sqlserver_batch_size(requested: usize, columns: usize) -> usize {
    let by_params = (SQLSERVER_MAX_PARAMS / columns.max(1)).max(1);
    requested.clamp(1, by_params.min(SQLSERVER_MAX_ROWS))
}

/// `(@P1, @P2), (@P3, @P4)` for two rows of two columns.
fn sqlserver_placeholders(rows: usize, columns: usize) -> String {
    (0..rows)
        .map(|row| {
            let cells = (1..=columns)
                .map(|column| format!("@P{}", row * columns + column))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({cells})")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn converted_rows<T>(
    schema: &TableSchema,
    data: &CsvTable,
    bind: impl Fn(usize, &ColumnSchema, CellValue) -> Result<T, LoadError>,
) -> Result<Vec<Vec<T>>, LoadError> {
    data.rows
        .iter()
        .enumerate()
        .map(|(index, cells)| {
            let row = index + 1;
            schema
                .columns
                .iter()
                .enumerate()
                .map(|(position, column)| {
                    let cell = cells.get(position).and_then(|cell| cell.as_deref());
                    bind(row, column, column.convert(row, cell)?)
                })
                .collect()
        })
        .collect()
}

fn typed_rows(schema: &TableSchema, data: &CsvTable) -> Result<Vec<Vec<BindValue>>, LoadError> {
    converted_rows(schema, data, |_, column, cell| Ok(bind_value(column, cell)))
}

fn sqlserver_rows(
    schema: &TableSchema,
    data: &CsvTable,
) -> Result<Vec<Vec<SqlServerValue>>, LoadError> {
    converted_rows(schema, data, sqlserver_value)
}

fn bind_value(column: &ColumnSchema, cell: CellValue) -> BindValue {
    match (column.column_type, cell) {
        (ColumnType::Integer, CellValue::Null) => BindValue::Integer(None),
        (ColumnType::Float, CellValue::Null) => BindValue::Numeric(None),
        (ColumnType::Timestamp, CellValue::Null) => BindValue::Timestamp(None),
        (ColumnType::Text, CellValue::Null) => BindValue::Text(None),
        (_, CellValue::Integer(value)) => BindValue::Integer(Some(value)),
        (_, CellValue::Float(text)) => BindValue::Numeric(Some(text)),
        (_, CellValue::Timestamp(value)) => BindValue::Timestamp(Some(value)),
        (_, CellValue::Text(value)) => BindValue::Text(Some(value)),
    }
}

fn sqlserver_value(
    row: usize,
    column: &ColumnSchema,
    cell: CellValue,
) -> Result<SqlServerValue, LoadError> {
    Ok(match (column.column_type, cell) {
        (ColumnType::Integer, CellValue::Null) => SqlServerValue::Integer(None),
        (ColumnType::Float, CellValue::Null) => SqlServerValue::Float(None),
        (ColumnType::Timestamp, CellValue::Null) => SqlServerValue::Timestamp(None),
        (ColumnType::Text, CellValue::Null) => SqlServerValue::Text(None),
        (_, CellValue::Integer(value)) => SqlServerValue::Integer(Some(value)),
        (_, CellValue::Float(text)) => {
            let value = text.parse::<f64>().map_err(|_| LoadError::Conversion {
                row,
                column: column.name.clone(),
                expected: column.column_type,
                value: text.clone(),
            })?;
            SqlServerValue::Float(Some(value))
        }
        (_, CellValue::Timestamp(value)) => SqlServerValue::Timestamp(Some(value)),
        (_, CellValue::Text(value)) => SqlServerValue::Text(Some(value)),
    })
}
