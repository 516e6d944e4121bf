pub mod auth;
pub mod client;
pub mod connectors;
pub mod control_plane;
pub mod sql_admin;
pub mod storage;

pub use auth::Credentials;
pub use client::ApiClient;
pub use control_plane::GcpControlPlane;
pub use sql_admin::InstanceSummary;
pub use storage::UploadError;
