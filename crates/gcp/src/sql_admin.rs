//! Managed SQL admin API (`sql/v1beta4`): instances, databases and their
//! operations.

use async_trait::async_trait;
use dbbuddy_core::domain::operation::{OperationHandle, OperationStatus, Submission};
use dbbuddy_core::domain::resource::{
    keys, ConfigDrift, ObservedResource, ResourceDescriptor, ResourceKind, ResourceState,
};
use dbbuddy_core::errors::{ControlPlaneError, DomainError};
use dbbuddy_core::reconcile::ControlPlane;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::ApiClient;

pub const DEFAULT_POSTGRES_TIER: &str = "db-f1-micro";
const NOT_RUNNING_MARKER: &str = "instance is not running";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    state: Option<String>,
    database_version: Option<String>,
    region: Option<String>,
    settings: Option<InstanceSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceList {
    #[serde(default)]
    items: Vec<InstanceSummary>,
}

/// One row of the project's instance listing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub name: String,
    #[serde(default)]
    pub database_version: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceSettings {
    tier: Option<String>,
    #[serde(default)]
    database_flags: Vec<DatabaseFlag>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseFlag {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseResource {
    charset: Option<String>,
    collation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SqlOperation {
    name: String,
    status: Option<String>,
    error: Option<SqlOperationErrors>,
}

#[derive(Debug, Deserialize)]
struct SqlOperationErrors {
    #[serde(default)]
    errors: Vec<SqlOperationError>,
}

#[derive(Debug, Deserialize)]
struct SqlOperationError {
    code: Option<String>,
    message: Option<String>,
}

impl SqlOperationErrors {
    fn describe(&self) -> String {
        let parts = self
            .errors
            .iter()
            .map(|error| match (&error.code, &error.message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (Some(code), None) => code.clone(),
                (None, Some(message)) => message.clone(),
                (None, None) => "unknown error".to_string(),
            })
            .collect::<Vec<_>>();
        if parts.is_empty() {
            "operation reported an error".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// `RUNNABLE` is ready; provisioning and maintenance states are waited on;
/// anything else (`FAILED`, `SUSPENDED`, ...) is terminal.
pub fn classify_instance_state(state: &str) -> ResourceState {
    match state {
        "RUNNABLE" => ResourceState::Ready(state.to_string()),
        "PENDING_CREATE" | "MAINTENANCE" | "STOPPED" | "UNKNOWN_STATE" => {
            ResourceState::Transient(state.to_string())
        }
        other => ResourceState::Failed(other.to_string()),
    }
}

/// Observed flags with the drifted ones set to their desired value.
pub fn merge_flags(observed: &ObservedResource, drift: &[ConfigDrift]) -> Vec<DatabaseFlag> {
    let mut flags = observed
        .flags()
        .into_iter()
        .map(|(name, value)| DatabaseFlag { name, value })
        .collect::<Vec<_>>();

    for change in drift {
        let Some(name) = change.key.strip_prefix(keys::FLAG_PREFIX) else {
            continue;
        };
        match flags.iter_mut().find(|flag| flag.name == name) {
            Some(flag) => flag.value = change.desired.clone(),
            None => flags.push(DatabaseFlag { name: name.to_string(), value: change.desired.clone() }),
        }
    }
    flags
}

#[derive(Clone, Debug)]
pub struct SqlAdminApi {
    client: ApiClient,
    base_url: String,
    project: String,
    root_password: Option<SecretString>,
}

impl SqlAdminApi {
    pub fn new(client: ApiClient, base_url: &str, project: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.into(),
            root_password: None,
        }
    }

    /// Root password sent when creating a SQL Server instance.
    pub fn with_root_password(mut self, password: Option<SecretString>) -> Self {
        self.root_password = password;
        self
    }

    /// Instances in the project, optionally only those whose database version
    /// starts with `version_prefix` (`POSTGRES`, `SQLSERVER`). Matching ignores
    /// case.
    pub async fn list_instances(
        &self,
        version_prefix: Option<&str>,
    ) -> Result<Vec<InstanceSummary>, ControlPlaneError> {
        let url = format!("{}/instances", self.project_url());
        let listing = self.client.get::<InstanceList>(&url).await?;
        let prefix = version_prefix.map(str::to_ascii_uppercase);

        Ok(listing
            .items
            .into_iter()
            .filter(|instance| match &prefix {
                Some(prefix) => instance.database_version.to_ascii_uppercase().starts_with(prefix),
                None => true,
            })
            .collect())
    }

    fn project_url(&self) -> String {
        format!("{}/sql/v1beta4/projects/{}", self.base_url, self.project)
    }

    fn instance_url(&self, instance: &str) -> String {
        format!("{}/instances/{instance}", self.project_url())
    }

    fn database_parts<'a>(
        &self,
        descriptor: &'a ResourceDescriptor,
    ) -> Result<(&'a str, &'a str), ControlPlaneError> {
        descriptor.database_parts().ok_or_else(|| {
            ControlPlaneError::Domain(DomainError::InvalidDescriptor {
                kind: descriptor.kind,
                identity: descriptor.identity.clone(),
                reason: "expected `instance/database`".to_string(),
            })
        })
    }

    async fn get_instance(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        let Some(instance) = self
            .client
            .get_optional::<InstanceResource>(&self.instance_url(&descriptor.identity))
            .await?
        else {
            return Ok(None);
        };

        let state = instance.state.as_deref().unwrap_or("UNKNOWN_STATE");
        let mut observed = ObservedResource::new(classify_instance_state(state));
        if let Some(version) = instance.database_version {
            observed = observed.with_config(keys::DATABASE_VERSION, version);
        }
        if let Some(region) = instance.region {
            observed = observed.with_config(keys::REGION, region);
        }
        let settings = instance.settings.unwrap_or_default();
        if let Some(tier) = settings.tier {
            observed = observed.with_config(keys::TIER, tier);
        }
        for flag in settings.database_flags {
            observed = observed.with_config(keys::flag(&flag.name), flag.value);
        }
        Ok(Some(observed))
    }

    async fn get_database(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        let (instance, database) = self.database_parts(descriptor)?;
        let url = format!("{}/databases/{database}", self.instance_url(instance));
        let Some(resource) = self.client.get_optional::<DatabaseResource>(&url).await? else {
            return Ok(None);
        };

        let mut observed = ObservedResource::ready("READY");
        if let Some(charset) = resource.charset {
            observed = observed.with_config(keys::CHARSET, charset);
        }
        if let Some(collation) = resource.collation {
            observed = observed.with_config(keys::COLLATION, collation);
        }
        Ok(Some(observed))
    }

    fn instance_body(&self, descriptor: &ResourceDescriptor) -> Result<Value, ControlPlaneError> {
        let invalid = |reason: &str| {
            ControlPlaneError::Domain(DomainError::InvalidDescriptor {
                kind: descriptor.kind,
                identity: descriptor.identity.clone(),
                reason: reason.to_string(),
            })
        };

        let version =
            descriptor.desired(keys::DATABASE_VERSION).ok_or_else(|| invalid("missing database_version"))?;
        let region = descriptor.desired(keys::REGION).ok_or_else(|| invalid("missing region"))?;
        let sqlserver = descriptor.desired(keys::ENGINE) == Some("sqlserver");

        let flags = descriptor
            .desired_config
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(keys::FLAG_PREFIX)
                    .map(|name| DatabaseFlag { name: name.to_string(), value: value.clone() })
            })
            .collect::<Vec<_>>();

        let mut settings = Map::new();
        settings.insert("backupConfiguration".to_string(), json!({ "enabled": true }));
        settings.insert(
            "ipConfiguration".to_string(),
            json!({ "ipv4Enabled": true, "requireSsl": true }),
        );
        if !flags.is_empty() {
            settings.insert("databaseFlags".to_string(), json!(flags));
        }

        let mut body = json!({
            "name": descriptor.identity,
            "project": self.project,
            "databaseVersion": version,
            "region": region,
        });

        if sqlserver {
            let tier = descriptor
                .desired(keys::TIER)
                .ok_or_else(|| invalid("SQL Server instances require a tier"))?;
            let password = self
                .root_password
                .as_ref()
                .ok_or_else(|| invalid("SQL Server instances require a root password"))?;
            settings.insert("tier".to_string(), json!(tier));
            body["rootPassword"] = json!(password.expose_secret());
        } else {
            let tier = descriptor.desired(keys::TIER).unwrap_or(DEFAULT_POSTGRES_TIER);
            settings.insert("tier".to_string(), json!(tier));
        }

        body["settings"] = Value::Object(settings);
        Ok(body)
    }

    fn submitted(kind: ResourceKind, operation: SqlOperation) -> Submission {
        Submission::Pending(OperationHandle::new(kind, operation.name))
    }
}

fn not_running_or(error: ControlPlaneError, instance: &str) -> ControlPlaneError {
    match error {
        ControlPlaneError::Api { status: 400, ref body }
            if body.to_ascii_lowercase().contains(NOT_RUNNING_MARKER) =>
        {
            ControlPlaneError::InstanceNotRunning { instance: instance.to_string() }
        }
        other => other,
    }
}

#[async_trait]
impl ControlPlane for SqlAdminApi {
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        match descriptor.kind {
            ResourceKind::Instance => self.get_instance(descriptor).await,
            ResourceKind::Database => self.get_database(descriptor).await,
            kind => Err(ControlPlaneError::Unsupported { kind }),
        }
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<Submission, ControlPlaneError> {
        match descriptor.kind {
            ResourceKind::Instance => {
                let body = self.instance_body(descriptor)?;
                let url = format!("{}/instances", self.project_url());
                let operation: SqlOperation = self.client.post(&url, &[], &body).await?;
                Ok(Self::submitted(descriptor.kind, operation))
            }
            ResourceKind::Database => {
                let (instance, database) = self.database_parts(descriptor)?;
                let mut body = json!({
                    "name": database,
                    "project": self.project,
                    "instance": instance,
                });
                if let Some(charset) = descriptor.desired(keys::CHARSET) {
                    body["charset"] = json!(charset);
                }
                if let Some(collation) = descriptor.desired(keys::COLLATION) {
                    body["collation"] = json!(collation);
                }

                let url = format!("{}/databases", self.instance_url(instance));
                let operation: SqlOperation = self
                    .client
                    .post(&url, &[], &body)
                    .await
                    .map_err(|error| not_running_or(error, instance))?;
                Ok(Self::submitted(descriptor.kind, operation))
            }
            kind => Err(ControlPlaneError::Unsupported { kind }),
        }
    }

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        observed: &ObservedResource,
        drift: &[ConfigDrift],
    ) -> Result<Submission, ControlPlaneError> {
        if descriptor.kind != ResourceKind::Instance {
            return Err(ControlPlaneError::Unsupported { kind: descriptor.kind });
        }

        let mut settings = Map::new();
        if drift.iter().any(|change| change.key.starts_with(keys::FLAG_PREFIX)) {
            settings.insert("databaseFlags".to_string(), json!(merge_flags(observed, drift)));
        }
        if let Some(tier) = drift.iter().find(|change| change.key == keys::TIER) {
            settings.insert("tier".to_string(), json!(tier.desired));
        }
        if let Some(unpatchable) = drift
            .iter()
            .find(|change| change.key != keys::TIER && !change.key.starts_with(keys::FLAG_PREFIX))
        {
            return Err(ControlPlaneError::Domain(DomainError::InvalidDescriptor {
                kind: descriptor.kind,
                identity: descriptor.identity.clone(),
                reason: format!("`{}` cannot be changed on an existing instance", unpatchable.key),
            }));
        }

        let body = json!({ "settings": Value::Object(settings) });
        let operation: SqlOperation = self
            .client
            .patch(&self.instance_url(&descriptor.identity), &[], &body)
            .await
            .map_err(|error| not_running_or(error, &descriptor.identity))?;
        Ok(Self::submitted(descriptor.kind, operation))
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let url = format!("{}/operations/{}", self.project_url(), handle.name);
        let operation: SqlOperation = self.client.get(&url).await?;
        let status = operation.status.as_deref().unwrap_or("PENDING");
        Ok(OperationStatus::parse(status, operation.error.map(|errors| errors.describe())))
    }
}
