use dbbuddy_core::config::{AppConfig, DatabaseEngine, ProvisioningTarget};
use dbbuddy_core::domain::operation::ReconciliationResult;
use dbbuddy_core::domain::plan;
use dbbuddy_core::errors::ApplicationError;
use dbbuddy_gcp::{GcpControlPlane, UploadError};
use tracing::info;

use crate::commands::{build_runtime, load_config, reconciler, CommandResult};

const COMMAND: &str = "provision";

pub fn run(engine: DatabaseEngine, skip_docs: bool, correlation_id: &str) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let target = match config.provisioning_target(engine) {
        Ok(target) => target,
        Err(error) => return CommandResult::config_failure(COMMAND, &error),
    };

    let bucket = if skip_docs {
        None
    } else {
        match config.require_docs_bucket() {
            Ok(bucket) => Some(bucket.to_string()),
            Err(error) => return CommandResult::config_failure(COMMAND, &error),
        }
    };

    let runtime = match build_runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(provision(&config, &target, bucket.as_deref(), correlation_id)) {
        Ok(lines) => CommandResult::success(COMMAND, lines.join("\n")),
        Err(error) => CommandResult::from_error(COMMAND, &error),
    }
}

/// Bucket, documents, instance, then database. Stops at the first resource
/// that does not reach a ready state.
async fn provision(
    config: &AppConfig,
    target: &ProvisioningTarget,
    bucket: Option<&str>,
    correlation_id: &str,
) -> Result<Vec<String>, ApplicationError> {
    let control_plane = GcpControlPlane::connect(&config.cloud, &target.project_id)
        .await?
        .with_root_password(target.root_password.clone());
    let storage = control_plane.storage().clone();
    let reconciler = reconciler(config, control_plane, correlation_id);
    let mut lines = Vec::new();

    if let Some(bucket) = bucket {
        let result = reconciler.ensure(&plan::bucket(bucket, &config.storage.location)).await?;
        record(&mut lines, result)?;

        let source = config.storage.docs_dir.join(target.engine.as_str());
        let uris = storage
            .upload_folder(bucket, &source, config.storage.prefix.as_deref())
            .await
            .map_err(upload_error)?;
        lines.push(format!("uploaded {} documents from {}", uris.len(), source.display()));
    }

    let results =
        reconciler.ensure_all(&[plan::instance(target), plan::database(target)]).await?;
    for result in results {
        record(&mut lines, result)?;
    }

    info!(
        event_name = "cli.provision.completed",
        correlation_id = correlation_id,
        engine = %target.engine,
        instance = %target.instance,
        database = %target.database,
        "provisioning finished"
    );
    Ok(lines)
}

fn record(lines: &mut Vec<String>, result: ReconciliationResult) -> Result<(), ApplicationError> {
    lines.push(result.summary());
    if result.success {
        Ok(())
    } else {
        Err(ApplicationError::Verification(lines.join("\n")))
    }
}

fn upload_error(error: UploadError) -> ApplicationError {
    match error {
        UploadError::ControlPlane(error) => error.into(),
        other => ApplicationError::Ingest(other.to_string()),
    }
}
