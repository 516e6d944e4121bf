use std::path::{Path, PathBuf};

use dbbuddy_core::config::{AppConfig, DatabaseEngine};
use dbbuddy_core::errors::ApplicationError;
use dbbuddy_db::{
    connect, connect_sqlserver, seed_from_csv, target_database_exists, LoadReport, SeedTarget,
};
use tracing::info;

use crate::commands::{
    build_runtime, connect_error, execution_error, load_config, load_error, CommandResult,
    EXIT_CONFIG,
};

const COMMAND: &str = "seed";

pub fn run(
    engine: DatabaseEngine,
    file: Option<PathBuf>,
    rows: Option<usize>,
    correlation_id: &str,
) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let path = match file.map(Ok).unwrap_or_else(|| config.seed_path(engine)) {
        Ok(path) => path,
        Err(error) => return CommandResult::config_failure(COMMAND, &error),
    };

    let max_rows = rows.unwrap_or(config.seed.max_rows);
    if max_rows == 0 {
        return CommandResult::failure(
            COMMAND,
            "config_validation",
            "--rows must be greater than zero",
            EXIT_CONFIG,
        );
    }

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(seed(&config, engine, &path, max_rows, correlation_id)) {
        Ok(report) => CommandResult::success(
            COMMAND,
            format!(
                "loaded {} rows into `{}` ({} columns, {} batches) from {}",
                report.rows_inserted,
                report.table,
                report.columns,
                report.batches,
                path.display()
            ),
        ),
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}

async fn seed(
    config: &AppConfig,
    engine: DatabaseEngine,
    path: &Path,
    max_rows: usize,
    correlation_id: &str,
) -> Result<LoadReport, ApplicationError> {
    let target = config.engine(engine);
    let database = target
        .require_database(engine)
        .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

    if !target_database_exists(target, engine).await.map_err(connect_error)? {
        return Err(ApplicationError::Persistence(format!(
            "database `{database}` does not exist on {}:{}",
            target.host, target.port
        )));
    }

    let table = &config.seed.table;
    let batch_size = config.seed.batch_size;
    let report = match engine {
        DatabaseEngine::Postgres => {
            let pool = connect(target, engine).await.map_err(connect_error)?;
            let loaded =
                seed_from_csv(SeedTarget::Postgres(&pool), table, path, max_rows, batch_size).await;
            pool.close().await;
            loaded.map_err(load_error)?
        }
        DatabaseEngine::SqlServer => {
            let mut client = connect_sqlserver(target, database).await.map_err(connect_error)?;
            let loaded =
                seed_from_csv(SeedTarget::SqlServer(&mut client), table, path, max_rows, batch_size)
                    .await
                    .map_err(load_error)?;
            client.close().await.map_err(execution_error)?;
            loaded
        }
    };

    info!(
        event_name = "cli.seed.completed",
        correlation_id = correlation_id,
        engine = %engine,
        table = %report.table,
        rows_inserted = report.rows_inserted,
        "seed finished"
    );
    Ok(report)
}
