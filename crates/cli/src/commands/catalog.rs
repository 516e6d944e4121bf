use dbbuddy_core::config::{AppConfig, DatabaseEngine};
use dbbuddy_core::errors::ApplicationError;
use dbbuddy_db::{connect, list_databases, list_tables};
use dbbuddy_gcp::{GcpControlPlane, InstanceSummary};

use crate::commands::{
    build_runtime, connect_error, execution_error, load_config, target_with_database,
    CommandResult,
};

const COMMAND: &str = "catalog";

/// What a catalog listing reads.
#[derive(Clone, Debug)]
pub enum Listing {
    /// Managed instances in the project, optionally of one engine.
    Instances(Option<DatabaseEngine>),
    /// Databases on the engine's server.
    Databases(DatabaseEngine),
    /// Public tables of the engine's database, or of `database` when given.
    Tables { engine: DatabaseEngine, database: Option<String> },
}

pub fn run(listing: Listing) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let listed = runtime.block_on(async {
        match listing {
            Listing::Instances(engine) => instances(&config, engine).await,
            Listing::Databases(engine) => databases(&config, engine).await,
            Listing::Tables { engine, database } => tables(&config, engine, database).await,
        }
    });

    match listed {
        Ok(message) => CommandResult::success(COMMAND, message),
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}

async fn instances(
    config: &AppConfig,
    engine: Option<DatabaseEngine>,
) -> Result<String, ApplicationError> {
    let project = config
        .require_project()
        .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
    let control_plane = GcpControlPlane::connect(&config.cloud, project).await?;
    let instances =
        control_plane.sql().list_instances(engine.map(|engine| engine.as_str())).await?;
    Ok(render_instances(&instances))
}

async fn databases(config: &AppConfig, engine: DatabaseEngine) -> Result<String, ApplicationError> {
    let pool = connect(config.engine(engine), engine).await.map_err(connect_error)?;
    let listed = list_databases(&pool).await;
    pool.close().await;
    Ok(listed.map_err(execution_error)?.join("\n"))
}

async fn tables(
    config: &AppConfig,
    engine: DatabaseEngine,
    database: Option<String>,
) -> Result<String, ApplicationError> {
    let target = target_with_database(config, engine, database);
    let pool = connect(&target, engine).await.map_err(connect_error)?;
    let listed = list_tables(&pool).await;
    pool.close().await;
    Ok(listed.map_err(execution_error)?.join("\n"))
}

fn render_instances(instances: &[InstanceSummary]) -> String {
    instances
        .iter()
        .map(|instance| {
            format!("{} ({}, {})", instance.name, instance.database_version, instance.state)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
