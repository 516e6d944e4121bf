use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known keys for `ResourceDescriptor::desired_config`.
pub mod keys {
    pub const ENGINE: &str = "engine";
    pub const DATABASE_VERSION: &str = "database_version";
    pub const REGION: &str = "region";
    pub const TIER: &str = "tier";
    pub const CHARSET: &str = "charset";
    pub const COLLATION: &str = "collation";
    pub const LOCATION: &str = "location";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const CONNECTOR_VERSION: &str = "connector_version";
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const USERNAME: &str = "username";
    pub const DATABASE: &str = "database";
    pub const PASSWORD_SECRET: &str = "password_secret";
    pub const SERVICE_ACCOUNT: &str = "service_account";

    /// Database flags are stored as `flag.<name>`.
    pub const FLAG_PREFIX: &str = "flag.";
    pub const IAM_AUTHENTICATION_FLAG: &str = "flag.cloudsql.iam_authentication";

    pub fn flag(name: &str) -> String {
        format!("{FLAG_PREFIX}{name}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    Database,
    Bucket,
    Connector,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Database => "database",
            Self::Bucket => "bucket",
            Self::Connector => "connector",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired shape of one managed resource.
///
/// Every key in `desired_config` is sent on creation. Keys listed in `enforced`
/// are additionally compared against an existing resource; a mismatch on any
/// of them is drift and results in a patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub identity: String,
    pub desired_config: BTreeMap<String, String>,
    #[serde(default)]
    pub enforced: BTreeSet<String>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, identity: impl Into<String>) -> Self {
        Self {
            kind,
            identity: identity.into(),
            desired_config: BTreeMap::new(),
            enforced: BTreeSet::new(),
        }
    }

    /// A database lives inside an instance, so its identity is `instance/database`.
    pub fn database(instance: &str, database: &str) -> Self {
        Self::new(ResourceKind::Database, format!("{instance}/{database}"))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.desired_config.insert(key.into(), value.into());
        self
    }

    pub fn enforce(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.enforced.insert(key.clone());
        self.desired_config.insert(key, value.into());
        self
    }

    pub fn desired(&self, key: &str) -> Option<&str> {
        self.desired_config.get(key).map(String::as_str)
    }

    pub fn database_parts(&self) -> Option<(&str, &str)> {
        if self.kind != ResourceKind::Database {
            return None;
        }
        self.identity
            .split_once('/')
            .filter(|(instance, database)| !instance.is_empty() && !database.is_empty())
    }

    /// Enforced keys whose observed value differs from the desired one.
    /// Values compare case-insensitively since providers normalise flag values.
    pub fn drift(&self, observed: &ObservedResource) -> Vec<ConfigDrift> {
        self.enforced
            .iter()
            .filter_map(|key| {
                let desired = self.desired_config.get(key)?;
                let current = observed.config.get(key);
                let matches =
                    current.map(|value| value.eq_ignore_ascii_case(desired)).unwrap_or(false);
                (!matches).then(|| ConfigDrift {
                    key: key.clone(),
                    desired: desired.clone(),
                    observed: current.cloned(),
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDrift {
    pub key: String,
    pub desired: String,
    pub observed: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum ResourceState {
    Ready(String),
    Transient(String),
    Failed(String),
}

impl ResourceState {
    pub fn label(&self) -> &str {
        match self {
            Self::Ready(label) | Self::Transient(label) | Self::Failed(label) => label,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResource {
    pub state: ResourceState,
    pub config: BTreeMap<String, String>,
}

impl ObservedResource {
    pub fn new(state: ResourceState) -> Self {
        Self { state, config: BTreeMap::new() }
    }

    pub fn ready(label: impl Into<String>) -> Self {
        Self::new(ResourceState::Ready(label.into()))
    }

    pub fn transient(label: impl Into<String>) -> Self {
        Self::new(ResourceState::Transient(label.into()))
    }

    pub fn failed(label: impl Into<String>) -> Self {
        Self::new(ResourceState::Failed(label.into()))
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Observed database flags as `(name, value)` pairs, in key order.
    pub fn flags(&self) -> Vec<(String, String)> {
        self.config
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(keys::FLAG_PREFIX).map(|name| (name.to_string(), value.clone()))
            })
            .collect()
    }
}
