use dbbuddy_core::config::{AppConfig, ConnectorTarget};
use dbbuddy_core::domain::plan;
use dbbuddy_core::errors::ApplicationError;
use dbbuddy_gcp::GcpControlPlane;
use tracing::info;

use crate::commands::{build_runtime, load_config, reconciler, CommandResult};

const COMMAND: &str = "connector";

pub fn run(correlation_id: &str) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let target = match config.connector_target() {
        Ok(target) => target,
        Err(error) => return CommandResult::config_failure(COMMAND, &error),
    };

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(ensure_connector(&config, &target, correlation_id)) {
        Ok(summary) => CommandResult::success(COMMAND, summary),
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}

async fn ensure_connector(
    config: &AppConfig,
    target: &ConnectorTarget,
    correlation_id: &str,
) -> Result<String, ApplicationError> {
    let control_plane = GcpControlPlane::connect(&config.cloud, &target.project_id).await?;
    let result =
        reconciler(config, control_plane, correlation_id).ensure(&plan::connector(target)).await?;

    if !result.success {
        return Err(ApplicationError::Verification(result.summary()));
    }

    info!(
        event_name = "cli.connector.ready",
        correlation_id = correlation_id,
        connection = %target.connection_id,
        region = %target.region,
        "connector ready"
    );
    Ok(result.summary())
}
