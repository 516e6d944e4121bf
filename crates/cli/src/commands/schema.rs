use std::path::Path;

use dbbuddy_core::errors::ApplicationError;
use dbbuddy_core::ingest::{infer_schema, read_csv, Dialect};

use crate::commands::{load_config, CommandResult};

const COMMAND: &str = "schema";

/// Infers the table for a CSV file and renders its DDL; no database involved.
pub fn run(
    file: &Path,
    dialect: Option<Dialect>,
    table: Option<String>,
    rows: Option<usize>,
) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let dialect = dialect.unwrap_or(Dialect::Postgres);
    let table = table.unwrap_or_else(|| config.seed.table.clone());
    let max_rows = rows.unwrap_or(config.seed.max_rows);

    let data = match read_csv(file, max_rows) {
        Ok(data) => data,
        Err(error) => {
            return CommandResult::from_error(
                COMMAND,
                &ApplicationError::Ingest(error.to_string()),
            );
        }
    };
    let schema = infer_schema(&table, &data);

    let mut lines = vec![format!(
        "table `{}` inferred from {} rows of {}:",
        schema.table,
        data.rows.len(),
        file.display()
    )];
    lines.extend(
        schema.columns.iter().map(|column| format!("- {} {}", column.name, column.column_type)),
    );
    lines.push(schema.create_table_sql(dialect));

    CommandResult::success(COMMAND, lines.join("\n"))
}
