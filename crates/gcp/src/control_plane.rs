use std::time::Duration;

use async_trait::async_trait;
use dbbuddy_core::config::CloudConfig;
use dbbuddy_core::domain::operation::{OperationHandle, OperationStatus, Submission};
use dbbuddy_core::domain::resource::{ConfigDrift, ObservedResource, ResourceDescriptor, ResourceKind};
use dbbuddy_core::errors::ControlPlaneError;
use dbbuddy_core::reconcile::ControlPlane;
use secrecy::SecretString;

use crate::auth::Credentials;
use crate::client::ApiClient;
use crate::connectors::ConnectorsApi;
use crate::sql_admin::SqlAdminApi;
use crate::storage::StorageApi;

/// Routes each resource kind to the API that owns it.
#[derive(Clone, Debug)]
pub struct GcpControlPlane {
    sql: SqlAdminApi,
    storage: StorageApi,
    connectors: ConnectorsApi,
}

impl GcpControlPlane {
    pub fn new(client: ApiClient, cloud: &CloudConfig, project: &str) -> Self {
        Self {
            sql: SqlAdminApi::new(client.clone(), &cloud.sql_admin_url, project),
            storage: StorageApi::new(client.clone(), &cloud.storage_url, project),
            connectors: ConnectorsApi::new(client, &cloud.connectors_url, project),
        }
    }

    pub async fn connect(cloud: &CloudConfig, project: &str) -> Result<Self, ControlPlaneError> {
        let credentials = Credentials::from_config(cloud).await?;
        let client = ApiClient::new(credentials, Duration::from_secs(cloud.request_timeout_secs))?;
        Ok(Self::new(client, cloud, project))
    }

    pub fn with_root_password(mut self, password: Option<SecretString>) -> Self {
        self.sql = self.sql.with_root_password(password);
        self
    }

    pub fn sql(&self) -> &SqlAdminApi {
        &self.sql
    }

    pub fn storage(&self) -> &StorageApi {
        &self.storage
    }

    fn route(&self, kind: ResourceKind) -> &dyn ControlPlane {
        match kind {
            ResourceKind::Instance | ResourceKind::Database => &self.sql,
            ResourceKind::Bucket => &self.storage,
            ResourceKind::Connector => &self.connectors,
        }
    }
}

#[async_trait]
impl ControlPlane for GcpControlPlane {
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        self.route(descriptor.kind).get(descriptor).await
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<Submission, ControlPlaneError> {
        self.route(descriptor.kind).create(descriptor).await
    }

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        observed: &ObservedResource,
        drift: &[ConfigDrift],
    ) -> Result<Submission, ControlPlaneError> {
        self.route(descriptor.kind).patch(descriptor, observed, drift).await
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ControlPlaneError> {
        self.route(handle.kind).operation_status(handle).await
    }
}
