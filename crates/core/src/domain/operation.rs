use serde::{Deserialize, Serialize};

use crate::domain::resource::{ResourceDescriptor, ResourceKind};

/// Handle for an asynchronous create or patch call. Only meaningful to the
/// control plane that issued it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    pub kind: ResourceKind,
    pub name: String,
}

impl OperationHandle {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
}

/// What a create or patch call returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Pending(OperationHandle),
    /// The change was applied synchronously (bucket inserts).
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Done { error: Option<String> },
}

impl OperationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done { .. } => "DONE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub fn parse(status: &str, error: Option<String>) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "DONE" => Self::Done { error },
            "RUNNING" => Self::Running,
            _ => Self::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    None,
    Created,
    Patched,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Created => "created",
            Self::Patched => "patched",
        }
    }
}

pub const STATE_TIMED_OUT: &str = "TIMED_OUT";
pub const STATE_OPERATION_FAILED: &str = "OPERATION_FAILED";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub kind: ResourceKind,
    pub identity: String,
    pub success: bool,
    pub final_state: String,
    pub error: Option<String>,
    pub action: ReconcileAction,
    pub polls: u32,
}

impl ReconciliationResult {
    pub fn ready(
        descriptor: &ResourceDescriptor,
        final_state: impl Into<String>,
        action: ReconcileAction,
        polls: u32,
    ) -> Self {
        Self {
            kind: descriptor.kind,
            identity: descriptor.identity.clone(),
            success: true,
            final_state: final_state.into(),
            error: None,
            action,
            polls,
        }
    }

    pub fn failed(
        descriptor: &ResourceDescriptor,
        final_state: impl Into<String>,
        error: impl Into<String>,
        action: ReconcileAction,
        polls: u32,
    ) -> Self {
        Self {
            kind: descriptor.kind,
            identity: descriptor.identity.clone(),
            success: false,
            final_state: final_state.into(),
            error: Some(error.into()),
            action,
            polls,
        }
    }

    pub fn summary(&self) -> String {
        let outcome = if self.success { "ready" } else { "failed" };
        match &self.error {
            Some(error) => format!(
                "{} `{}` {outcome} in state {} ({}): {error}",
                self.kind,
                self.identity,
                self.final_state,
                self.action.as_str()
            ),
            None => format!(
                "{} `{}` {outcome} in state {} ({})",
                self.kind,
                self.identity,
                self.final_state,
                self.action.as_str()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OperationStatus;

    #[test]
    fn operation_status_parses_provider_strings() {
        assert_eq!(OperationStatus::parse("PENDING", None), OperationStatus::Pending);
        assert_eq!(OperationStatus::parse("running", None), OperationStatus::Running);
        assert_eq!(
            OperationStatus::parse("DONE", Some("quota exceeded".to_string())),
            OperationStatus::Done { error: Some("quota exceeded".to_string()) }
        );
        assert_eq!(
            OperationStatus::parse("SQL_OPERATION_STATUS_UNSPECIFIED", None),
            OperationStatus::Pending
        );
    }
}
