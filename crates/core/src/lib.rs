pub mod config;
pub mod domain;
pub mod errors;
pub mod ingest;
pub mod reconcile;

pub use config::{AppConfig, DatabaseEngine, LoadOptions};
pub use domain::operation::{
    OperationHandle, OperationStatus, ReconcileAction, ReconciliationResult, Submission,
};
pub use domain::resource::{
    ConfigDrift, ObservedResource, ResourceDescriptor, ResourceKind, ResourceState,
};
pub use errors::{ApplicationError, ControlPlaneError, DomainError};
pub use ingest::{CsvTable, Dialect, IngestError, TableSchema};
pub use reconcile::{ControlPlane, PollPolicy, ReconcileError, Reconciler};
