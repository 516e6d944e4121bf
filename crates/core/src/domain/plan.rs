//! Builds the descriptors a provisioning run reconciles, from resolved config.

use crate::config::{ConnectorTarget, DatabaseEngine, ProvisioningTarget};
use crate::domain::resource::{keys, ResourceDescriptor, ResourceKind};

pub const IAM_AUTHENTICATION_ON: &str = "on";

pub fn bucket(name: &str, location: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(ResourceKind::Bucket, name).with(keys::LOCATION, location)
}

/// Postgres instances enforce IAM database authentication; drift on the flag
/// leads to a patch of an existing instance.
pub fn instance(target: &ProvisioningTarget) -> ResourceDescriptor {
    let descriptor = ResourceDescriptor::new(ResourceKind::Instance, &target.instance)
        .with(keys::ENGINE, target.engine.as_str())
        .with(keys::DATABASE_VERSION, &target.version)
        .with(keys::REGION, &target.region)
        .with(keys::TIER, &target.tier);

    match target.engine {
        DatabaseEngine::Postgres => {
            descriptor.enforce(keys::IAM_AUTHENTICATION_FLAG, IAM_AUTHENTICATION_ON)
        }
        DatabaseEngine::SqlServer => descriptor,
    }
}

pub fn database(target: &ProvisioningTarget) -> ResourceDescriptor {
    let descriptor = ResourceDescriptor::database(&target.instance, &target.database)
        .with(keys::ENGINE, target.engine.as_str());

    match target.engine {
        DatabaseEngine::Postgres => {
            descriptor.with(keys::CHARSET, "UTF8").with(keys::COLLATION, "en_US.UTF8")
        }
        DatabaseEngine::SqlServer => descriptor,
    }
}

pub fn connector(target: &ConnectorTarget) -> ResourceDescriptor {
    let mut descriptor = ResourceDescriptor::new(ResourceKind::Connector, &target.connection_id)
        .with(keys::REGION, &target.region)
        .with(keys::PASSWORD_SECRET, &target.password_secret)
        .enforce(keys::HOST, &target.host)
        .enforce(keys::PORT, target.port.to_string())
        .enforce(keys::USERNAME, &target.username)
        .enforce(keys::DATABASE, &target.database);

    if let Some(display_name) = &target.display_name {
        descriptor = descriptor.with(keys::DISPLAY_NAME, display_name);
    }
    if let Some(service_account) = &target.service_account {
        descriptor = descriptor.with(keys::SERVICE_ACCOUNT, service_account);
    }
    descriptor
}

#[cfg(test)]
mod tests {
    use super::{connector, database, instance};
    use crate::config::{ConnectorTarget, DatabaseEngine, ProvisioningTarget};
    use crate::domain::resource::keys;

    fn target(engine: DatabaseEngine) -> ProvisioningTarget {
        ProvisioningTarget {
            engine,
            project_id: "demo".to_string(),
            instance: "main".to_string(),
            database: "taxi".to_string(),
            region: "us-central1".to_string(),
            version: "POSTGRES_15".to_string(),
            tier: "db-f1-micro".to_string(),
            root_password: None,
        }
    }

    #[test]
    fn postgres_instance_enforces_iam_flag() {
        let descriptor = instance(&target(DatabaseEngine::Postgres));
        assert!(descriptor.enforced.contains(keys::IAM_AUTHENTICATION_FLAG));
        assert_eq!(descriptor.desired(keys::TIER), Some("db-f1-micro"));
    }

    #[test]
    fn sqlserver_instance_has_no_flags_and_database_no_charset() {
        let instance = instance(&target(DatabaseEngine::SqlServer));
        assert!(instance.enforced.is_empty());

        let database = database(&target(DatabaseEngine::SqlServer));
        assert_eq!(database.identity, "main/taxi");
        assert_eq!(database.desired(keys::CHARSET), None);
    }

    #[test]
    fn connector_enforces_connection_variables() {
        let descriptor = connector(&ConnectorTarget {
            project_id: "demo".to_string(),
            region: "us-central1".to_string(),
            connection_id: "sqlserver-connector".to_string(),
            display_name: None,
            host: "10.0.0.5".to_string(),
            port: 1433,
            username: "sqlserver".to_string(),
            database: "taxi".to_string(),
            password_secret: "sqlsvr-password".to_string(),
            service_account: None,
        });

        assert_eq!(descriptor.desired(keys::PORT), Some("1433"));
        assert_eq!(descriptor.enforced.len(), 4);
        assert!(!descriptor.enforced.contains(keys::PASSWORD_SECRET));
    }
}
