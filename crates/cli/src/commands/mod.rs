pub mod catalog;
pub mod config;
pub mod connector;
pub mod doctor;
pub mod provision;
pub mod query;
pub mod schema;
pub mod seed;

use std::sync::Arc;

use dbbuddy_core::config::{AppConfig, ConfigError, DatabaseEngine, EngineConfig, LoadOptions};
use dbbuddy_core::errors::ApplicationError;
use dbbuddy_core::reconcile::{PollPolicy, Reconciler};
use dbbuddy_db::{ConnectError, LoadError};
use dbbuddy_gcp::GcpControlPlane;
use serde::Serialize;
use tokio::runtime::Runtime;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_error(command: &str, error: &ApplicationError) -> Self {
        Self::failure(command, error.error_class(), error.to_string(), error.exit_code())
    }

    fn config_failure(command: &str, error: &ConfigError) -> Self {
        Self::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default())
        .map_err(|error| CommandResult::config_failure(command, &error))
}

pub(crate) fn build_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            EXIT_RUNTIME,
        )
    })
}

/// Reconciler over the cloud control plane, polling as configured.
pub(crate) fn reconciler(
    config: &AppConfig,
    control_plane: GcpControlPlane,
    correlation_id: &str,
) -> Reconciler {
    Reconciler::new(Arc::new(control_plane), PollPolicy::operations(&config.poll))
        .with_readiness_policy(PollPolicy::readiness(&config.poll))
        .with_correlation_id(correlation_id)
}

/// Engine settings with the database name replaced when `database` is given.
pub(crate) fn target_with_database(
    config: &AppConfig,
    engine: DatabaseEngine,
    database: Option<String>,
) -> EngineConfig {
    let mut target = config.engine(engine).clone();
    if let Some(database) = database {
        target.database = Some(database);
    }
    target
}

pub(crate) fn connect_error(error: ConnectError) -> ApplicationError {
    match error {
        ConnectError::Config(error) => ApplicationError::Configuration(error.to_string()),
        ConnectError::UnsupportedEngine(engine) => ApplicationError::Configuration(format!(
            "{engine} targets are not supported for direct database access"
        )),
        other @ (ConnectError::Database(_)
        | ConnectError::SqlServer(_)
        | ConnectError::Io(_)
        | ConnectError::Timeout { .. }) => ApplicationError::Persistence(other.to_string()),
    }
}

/// Failures of a statement sent over an open connection.
pub(crate) fn execution_error(error: impl std::fmt::Display) -> ApplicationError {
    ApplicationError::Execution(error.to_string())
}

pub(crate) fn load_error(error: LoadError) -> ApplicationError {
    match error {
        other @ (LoadError::Database(_) | LoadError::SqlServer(_)) => execution_error(other),
        other @ (LoadError::Ingest(_) | LoadError::Conversion { .. }) => {
            ApplicationError::Ingest(other.to_string())
        }
    }
}
