//! Integration connectors API: the SQL Server connection used by the agent.

use async_trait::async_trait;
use dbbuddy_core::domain::operation::{OperationHandle, OperationStatus, Submission};
use dbbuddy_core::domain::resource::{
    keys, ConfigDrift, ObservedResource, ResourceDescriptor, ResourceKind, ResourceState,
};
use dbbuddy_core::errors::{ControlPlaneError, DomainError};
use dbbuddy_core::reconcile::ControlPlane;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::client::ApiClient;

pub const SQLSERVER_PROVIDER: &str = "microsoft";
pub const SQLSERVER_CONNECTOR: &str = "sqlserver";
const CONNECTION_VARIABLES: [&str; 4] = [keys::HOST, keys::PORT, keys::USERNAME, keys::DATABASE];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionResource {
    status: Option<ConnectionStatus>,
    #[serde(default)]
    config_variables: Vec<ConfigVariable>,
}

#[derive(Debug, Deserialize)]
struct ConnectionStatus {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigVariable {
    key: String,
    string_value: Option<String>,
    int_value: Option<Value>,
}

impl ConfigVariable {
    fn value(&self) -> Option<String> {
        if let Some(value) = &self.string_value {
            return Some(value.clone());
        }
        match &self.int_value {
            Some(Value::String(value)) => Some(value.clone()),
            Some(Value::Number(value)) => Some(value.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LongRunningOperation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    code: Option<i32>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionList {
    #[serde(default)]
    connector_versions: Vec<ConnectorVersion>,
}

#[derive(Debug, Deserialize)]
struct ConnectorVersion {
    name: String,
}

pub fn classify_connection_state(state: &str) -> ResourceState {
    match state {
        "ACTIVE" => ResourceState::Ready(state.to_string()),
        "CREATING" | "UPDATING" | "STATE_UNSPECIFIED" => {
            ResourceState::Transient(state.to_string())
        }
        other => ResourceState::Failed(other.to_string()),
    }
}

#[derive(Clone, Debug)]
pub struct ConnectorsApi {
    client: ApiClient,
    base_url: String,
    project: String,
}

impl ConnectorsApi {
    pub fn new(client: ApiClient, base_url: &str, project: impl Into<String>) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), project: project.into() }
    }

    /// Highest version name of a provider's connector; version names embed the
    /// version number.
    pub async fn latest_version(
        &self,
        provider: &str,
        connector: &str,
    ) -> Result<String, ControlPlaneError> {
        let url = format!(
            "{}/v1/projects/{}/locations/global/providers/{provider}/connectors/{connector}/versions",
            self.base_url, self.project
        );
        let list: VersionList = self.client.get(&url).await?;
        list.connector_versions
            .into_iter()
            .map(|version| version.name)
            .max()
            .ok_or_else(|| ControlPlaneError::Api {
                status: 404,
                body: format!("no connector versions found for {provider}/{connector}"),
            })
    }

    fn connections_url(&self, descriptor: &ResourceDescriptor) -> Result<String, ControlPlaneError> {
        let region =
            descriptor.desired(keys::REGION).ok_or_else(|| invalid(descriptor, "missing region"))?;
        Ok(format!(
            "{}/v1/projects/{}/locations/{region}/connections",
            self.base_url, self.project
        ))
    }

    fn config_variables(&self, descriptor: &ResourceDescriptor) -> Result<Vec<Value>, ControlPlaneError> {
        CONNECTION_VARIABLES
            .iter()
            .map(|key| {
                let value = descriptor
                    .desired(key)
                    .ok_or_else(|| invalid(descriptor, &format!("missing `{key}`")))?;
                if *key == keys::PORT {
                    let port = value
                        .parse::<u16>()
                        .map_err(|_| invalid(descriptor, &format!("invalid port `{value}`")))?;
                    Ok(json!({ "key": key, "intValue": port }))
                } else {
                    Ok(json!({ "key": key, "stringValue": value }))
                }
            })
            .collect()
    }

    fn secret_version(&self, secret: &str) -> String {
        if secret.contains('/') {
            secret.to_string()
        } else {
            format!("projects/{}/secrets/{secret}/versions/latest", self.project)
        }
    }
}

fn invalid(descriptor: &ResourceDescriptor, reason: &str) -> ControlPlaneError {
    ControlPlaneError::Domain(DomainError::InvalidDescriptor {
        kind: descriptor.kind,
        identity: descriptor.identity.clone(),
        reason: reason.to_string(),
    })
}

fn submitted(operation: LongRunningOperation) -> Submission {
    if operation.done && operation.error.is_none() {
        return Submission::Completed;
    }
    Submission::Pending(OperationHandle::new(ResourceKind::Connector, operation.name))
}

#[async_trait]
impl ControlPlane for ConnectorsApi {
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        if descriptor.kind != ResourceKind::Connector {
            return Err(ControlPlaneError::Unsupported { kind: descriptor.kind });
        }

        let url = format!("{}/{}", self.connections_url(descriptor)?, descriptor.identity);
        let Some(connection) = self.client.get_optional::<ConnectionResource>(&url).await? else {
            return Ok(None);
        };

        let state = connection
            .status
            .and_then(|status| status.state)
            .unwrap_or_else(|| "STATE_UNSPECIFIED".to_string());
        let mut observed = ObservedResource::new(classify_connection_state(&state));
        for variable in &connection.config_variables {
            if let Some(value) = variable.value() {
                observed = observed.with_config(variable.key.clone(), value);
            }
        }
        Ok(Some(observed))
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<Submission, ControlPlaneError> {
        if descriptor.kind != ResourceKind::Connector {
            return Err(ControlPlaneError::Unsupported { kind: descriptor.kind });
        }

        let version = match descriptor.desired(keys::CONNECTOR_VERSION) {
            Some(version) => version.to_string(),
            None => self.latest_version(SQLSERVER_PROVIDER, SQLSERVER_CONNECTOR).await?,
        };
        info!(
            event_name = "connector.version_selected",
            connection = %descriptor.identity,
            version = %version,
            "using connector version"
        );

        let secret = descriptor
            .desired(keys::PASSWORD_SECRET)
            .ok_or_else(|| invalid(descriptor, "missing password secret"))?;
        let username = descriptor
            .desired(keys::USERNAME)
            .ok_or_else(|| invalid(descriptor, "missing `username`"))?;

        let mut body = json!({
            "connectorVersion": version,
            "configVariables": self.config_variables(descriptor)?,
            "authConfig": {
                "authType": "USER_PASSWORD",
                "userPassword": {
                    "username": username,
                    "password": { "secretVersion": self.secret_version(secret) }
                }
            }
        });
        if let Some(display_name) = descriptor.desired(keys::DISPLAY_NAME) {
            body["displayName"] = json!(display_name);
        }
        if let Some(service_account) = descriptor.desired(keys::SERVICE_ACCOUNT) {
            body["serviceAccount"] = json!(service_account);
        }

        let url = self.connections_url(descriptor)?;
        let operation: LongRunningOperation = self
            .client
            .post(&url, &[("connectionId", descriptor.identity.as_str())], &body)
            .await?;
        Ok(submitted(operation))
    }

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        _observed: &ObservedResource,
        drift: &[ConfigDrift],
    ) -> Result<Submission, ControlPlaneError> {
        if descriptor.kind != ResourceKind::Connector {
            return Err(ControlPlaneError::Unsupported { kind: descriptor.kind });
        }
        if let Some(change) =
            drift.iter().find(|change| !CONNECTION_VARIABLES.contains(&change.key.as_str()))
        {
            return Err(invalid(
                descriptor,
                &format!("`{}` cannot be changed on an existing connection", change.key),
            ));
        }

        let body = json!({ "configVariables": self.config_variables(descriptor)? });
        let url = format!("{}/{}", self.connections_url(descriptor)?, descriptor.identity);
        let operation: LongRunningOperation =
            self.client.patch(&url, &[("updateMask", "configVariables")], &body).await?;
        Ok(submitted(operation))
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let url = format!("{}/v1/{}", self.base_url, handle.name);
        let operation: LongRunningOperation = self.client.get(&url).await?;
        if !operation.done {
            return Ok(OperationStatus::Running);
        }

        let error = operation.error.map(|status| match (status.code, status.message) {
            (Some(code), Some(message)) => format!("code {code}: {message}"),
            (None, Some(message)) => message,
            (Some(code), None) => format!("code {code}"),
            (None, None) => "operation reported an error".to_string(),
        });
        Ok(OperationStatus::Done { error })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dbbuddy_core::domain::operation::{OperationHandle, OperationStatus, Submission};
    use dbbuddy_core::domain::resource::{keys, ResourceDescriptor, ResourceKind, ResourceState};
    use dbbuddy_core::reconcile::ControlPlane;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{classify_connection_state, ConnectorsApi};
    use crate::auth::Credentials;
    use crate::client::ApiClient;

    const VERSIONS_PATH: &str =
        "/v1/projects/demo/locations/global/providers/microsoft/connectors/sqlserver/versions";
    const CONNECTIONS_PATH: &str = "/v1/projects/demo/locations/us-central1/connections";

    fn api(server: &MockServer) -> ConnectorsApi {
        let client = ApiClient::new(Credentials::fixed("token"), Duration::from_secs(5))
            .expect("client should build");
        ConnectorsApi::new(client, &server.uri(), "demo")
    }

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Connector, "sqlserver-connector")
            .with(keys::REGION, "us-central1")
            .with(keys::PASSWORD_SECRET, "sqlsvr-password")
            .enforce(keys::HOST, "10.0.0.5")
            .enforce(keys::PORT, "1433")
            .enforce(keys::USERNAME, "sqlserver")
            .enforce(keys::DATABASE, "taxi")
    }

    #[test]
    fn connection_states_are_classified() {
        assert!(classify_connection_state("ACTIVE").is_ready());
        assert_eq!(
            classify_connection_state("CREATING"),
            ResourceState::Transient("CREATING".to_string())
        );
        assert!(classify_connection_state("AUTHORIZATION_REQUIRED").is_failed());
    }

    #[tokio::test]
    async fn latest_version_sorts_names_descending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VERSIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connectorVersions": [
                    {"name": "projects/demo/locations/global/providers/microsoft/connectors/sqlserver/versions/1"},
                    {"name": "projects/demo/locations/global/providers/microsoft/connectors/sqlserver/versions/3"},
                    {"name": "projects/demo/locations/global/providers/microsoft/connectors/sqlserver/versions/2"}
                ]
            })))
            .mount(&server)
            .await;

        let latest = api(&server).latest_version("microsoft", "sqlserver").await.expect("versions");
        assert!(latest.ends_with("/versions/3"));
    }

    #[tokio::test]
    async fn create_resolves_version_and_references_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VERSIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connectorVersions": [{"name": "versions/1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(CONNECTIONS_PATH))
            .and(query_param("connectionId", "sqlserver-connector"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/locations/us-central1/operations/op-7",
                "done": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let submission = api(&server).create(&descriptor()).await.expect("create");
        assert_eq!(
            submission,
            Submission::Pending(OperationHandle::new(
                ResourceKind::Connector,
                "projects/demo/locations/us-central1/operations/op-7"
            ))
        );

        let requests = server.received_requests().await.expect("recording enabled");
        let body: Value = serde_json::from_slice(&requests[1].body).expect("json body");
        assert_eq!(body["connectorVersion"], json!("versions/1"));
        assert_eq!(
            body["authConfig"]["userPassword"]["password"]["secretVersion"],
            json!("projects/demo/secrets/sqlsvr-password/versions/latest")
        );
        assert_eq!(body["configVariables"][1], json!({"key": "port", "intValue": 1433}));
    }

    #[tokio::test]
    async fn existing_connection_reports_state_and_variables() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{CONNECTIONS_PATH}/sqlserver-connector")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"state": "ACTIVE"},
                "configVariables": [
                    {"key": "host", "stringValue": "10.0.0.5"},
                    {"key": "port", "intValue": "1433"},
                    {"key": "username", "stringValue": "sqlserver"},
                    {"key": "database", "stringValue": "taxi"}
                ]
            })))
            .mount(&server)
            .await;

        let observed =
            api(&server).get(&descriptor()).await.expect("get").expect("connection exists");
        assert!(observed.state.is_ready());
        assert!(descriptor().drift(&observed).is_empty());
    }

    #[tokio::test]
    async fn finished_operation_with_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/demo/locations/us-central1/operations/op-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/locations/us-central1/operations/op-7",
                "done": true,
                "error": {"code": 7, "message": "permission denied on secret"}
            })))
            .mount(&server)
            .await;

        let status = api(&server)
            .operation_status(&OperationHandle::new(
                ResourceKind::Connector,
                "projects/demo/locations/us-central1/operations/op-7",
            ))
            .await
            .expect("status");
        assert_eq!(
            status,
            OperationStatus::Done { error: Some("code 7: permission denied on secret".to_string()) }
        );
    }
}
