use dbbuddy_core::config::{AppConfig, DatabaseEngine};
use dbbuddy_core::errors::ApplicationError;
use dbbuddy_db::{connect, execute_query};
use tracing::info;

use crate::commands::{
    build_runtime, connect_error, execution_error, load_config, target_with_database,
    CommandResult, EXIT_CONFIG,
};

const COMMAND: &str = "query";

pub fn run(
    engine: DatabaseEngine,
    sql: &str,
    database: Option<String>,
    correlation_id: &str,
) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    if sql.trim().is_empty() {
        return CommandResult::failure(
            COMMAND,
            "invalid_input",
            "query text is empty",
            EXIT_CONFIG,
        );
    }

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(query(&config, engine, database, sql, correlation_id)) {
        Ok(rendered) => CommandResult::success(COMMAND, rendered),
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}

async fn query(
    config: &AppConfig,
    engine: DatabaseEngine,
    database: Option<String>,
    sql: &str,
    correlation_id: &str,
) -> Result<String, ApplicationError> {
    let target = target_with_database(config, engine, database);
    let pool = connect(&target, engine).await.map_err(connect_error)?;
    let output = execute_query(&pool, sql).await;
    pool.close().await;
    let output = output.map_err(execution_error)?;

    info!(
        event_name = "cli.query.executed",
        correlation_id = correlation_id,
        engine = %engine,
        database = target.database.as_deref().unwrap_or_default(),
        "query executed"
    );
    Ok(output.render())
}
