use thiserror::Error;

use crate::{domain::resource::ResourceKind, reconcile::ReconcileError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {kind} descriptor `{identity}`: {reason}")]
    InvalidDescriptor { kind: ResourceKind, identity: String, reason: String },
}

/// Failures reported by a control-plane adapter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("instance `{instance}` is not running; start it and retry")]
    InstanceNotRunning { instance: String },
    #[error("control plane returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("control plane request failed: {0}")]
    Transport(String),
    #[error("control plane authentication failed: {0}")]
    Auth(String),
    #[error("could not decode control plane response: {0}")]
    Decode(String),
    #[error("{kind} resources are not handled by this control plane")]
    Unsupported { kind: ResourceKind },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("control plane failure: {0}")]
    ControlPlane(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("ingest failure: {0}")]
    Ingest(String),
    #[error("statement failed: {0}")]
    Execution(String),
    #[error("verification failure: {0}")]
    Verification(String),
}

impl ApplicationError {
    /// Stable machine-readable class used in command output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain_validation",
            Self::Configuration(_) => "config_validation",
            Self::ControlPlane(_) => "control_plane",
            Self::Persistence(_) => "db_connectivity",
            Self::Ingest(_) => "ingest",
            Self::Execution(_) => "execution",
            Self::Verification(_) => "verification",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Domain(_) | Self::Configuration(_) => 2,
            Self::ControlPlane(_) | Self::Persistence(_) => 4,
            Self::Ingest(_) | Self::Execution(_) => 5,
            Self::Verification(_) => 6,
        }
    }
}

impl From<ControlPlaneError> for ApplicationError {
    fn from(value: ControlPlaneError) -> Self {
        match value {
            ControlPlaneError::Domain(error) => Self::Domain(error),
            other => Self::ControlPlane(other.to_string()),
        }
    }
}

impl From<ReconcileError> for ApplicationError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::ControlPlane(error) => Self::from(error),
        }
    }
}
