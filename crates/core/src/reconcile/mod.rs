//! Drives managed resources towards their desired state.
//!
//! `Reconciler::ensure` observes a resource through a [`ControlPlane`], creates
//! it when absent, patches it when an enforced setting drifted, and then polls
//! until a terminal state is reached. Polling is bounded by [`PollPolicy`].

pub mod memory;
pub mod policy;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::operation::{
    OperationHandle, OperationStatus, ReconcileAction, ReconciliationResult, Submission,
    STATE_OPERATION_FAILED, STATE_TIMED_OUT,
};
use crate::domain::resource::{ConfigDrift, ObservedResource, ResourceDescriptor, ResourceState};
use crate::errors::ControlPlaneError;

pub use memory::{CallCounts, InMemoryControlPlane};
pub use policy::PollPolicy;

/// Remote API that owns the resources.
///
/// `get` returns `Ok(None)` for a resource that does not exist; every other
/// error is fatal to the reconciliation.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError>;

    async fn create(&self, descriptor: &ResourceDescriptor)
        -> Result<Submission, ControlPlaneError>;

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        observed: &ObservedResource,
        drift: &[ConfigDrift],
    ) -> Result<Submission, ControlPlaneError>;

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ControlPlaneError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

enum OperationOutcome {
    Done { polls: u32 },
    Failed { error: String, polls: u32 },
    TimedOut { last: &'static str, polls: u32 },
}

pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    operation_policy: PollPolicy,
    readiness_policy: PollPolicy,
    correlation_id: String,
}

impl Reconciler {
    pub fn new(control_plane: Arc<dyn ControlPlane>, policy: PollPolicy) -> Self {
        Self {
            control_plane,
            operation_policy: policy.clone(),
            readiness_policy: policy,
            correlation_id: "unassigned".to_string(),
        }
    }

    pub fn with_readiness_policy(mut self, policy: PollPolicy) -> Self {
        self.readiness_policy = policy;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub async fn ensure(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<ReconciliationResult, ReconcileError> {
        info!(
            event_name = "reconcile.started",
            correlation_id = %self.correlation_id,
            kind = %descriptor.kind,
            identity = %descriptor.identity,
            "reconciling resource"
        );

        let Some(observed) = self.control_plane.get(descriptor).await? else {
            info!(
                event_name = "reconcile.create_submitted",
                correlation_id = %self.correlation_id,
                kind = %descriptor.kind,
                identity = %descriptor.identity,
                "resource not found; creating"
            );
            let submission = self.control_plane.create(descriptor).await?;
            return self.follow(descriptor, submission, ReconcileAction::Created).await;
        };

        info!(
            event_name = "reconcile.state_observed",
            correlation_id = %self.correlation_id,
            kind = %descriptor.kind,
            identity = %descriptor.identity,
            state = observed.state.label(),
            "resource exists"
        );

        if let ResourceState::Failed(label) = &observed.state {
            error!(
                event_name = "reconcile.terminal_failure",
                correlation_id = %self.correlation_id,
                kind = %descriptor.kind,
                identity = %descriptor.identity,
                state = label.as_str(),
                "resource is in a non-recoverable state"
            );
            return Ok(ReconciliationResult::failed(
                descriptor,
                label.clone(),
                format!("resource is in non-recoverable state {label}"),
                ReconcileAction::None,
                0,
            ));
        }

        let drift = descriptor.drift(&observed);
        if drift.is_empty() {
            if observed.state.is_ready() {
                return Ok(ReconciliationResult::ready(
                    descriptor,
                    observed.state.label(),
                    ReconcileAction::None,
                    0,
                ));
            }
            return self.wait_for_ready(descriptor, ReconcileAction::None, 0).await;
        }

        let drifted_keys = drift.iter().map(|entry| entry.key.as_str()).collect::<Vec<_>>();
        info!(
            event_name = "reconcile.patch_submitted",
            correlation_id = %self.correlation_id,
            kind = %descriptor.kind,
            identity = %descriptor.identity,
            drifted = %drifted_keys.join(","),
            "configuration drift detected; patching"
        );
        let submission = self.control_plane.patch(descriptor, &observed, &drift).await?;
        self.follow(descriptor, submission, ReconcileAction::Patched).await
    }

    /// Reconciles in order and stops at the first unsuccessful result.
    pub async fn ensure_all(
        &self,
        descriptors: &[ResourceDescriptor],
    ) -> Result<Vec<ReconciliationResult>, ReconcileError> {
        let mut results = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let result = self.ensure(descriptor).await?;
            let success = result.success;
            results.push(result);
            if !success {
                warn!(
                    event_name = "reconcile.sequence_halted",
                    correlation_id = %self.correlation_id,
                    kind = %descriptor.kind,
                    identity = %descriptor.identity,
                    "stopping reconciliation after unsuccessful resource"
                );
                break;
            }
        }
        Ok(results)
    }

    async fn follow(
        &self,
        descriptor: &ResourceDescriptor,
        submission: Submission,
        action: ReconcileAction,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let mut polls = 0;
        if let Submission::Pending(handle) = submission {
            match self.wait_for_operation(descriptor, &handle).await? {
                OperationOutcome::Done { polls: used } => polls = used,
                OperationOutcome::Failed { error, polls } => {
                    return Ok(ReconciliationResult::failed(
                        descriptor,
                        STATE_OPERATION_FAILED,
                        error,
                        action,
                        polls,
                    ));
                }
                OperationOutcome::TimedOut { last, polls } => {
                    return Ok(ReconciliationResult::failed(
                        descriptor,
                        STATE_TIMED_OUT,
                        format!(
                            "operation `{}` still {last} after {polls} polls",
                            handle.name
                        ),
                        action,
                        polls,
                    ));
                }
            }
        }

        self.wait_for_ready(descriptor, action, polls).await
    }

    async fn wait_for_operation(
        &self,
        descriptor: &ResourceDescriptor,
        handle: &OperationHandle,
    ) -> Result<OperationOutcome, ReconcileError> {
        let policy = &self.operation_policy;
        let mut previous: Option<&'static str> = None;

        for attempt in 0..policy.max_attempts {
            let status = self.control_plane.operation_status(handle).await?;
            let polls = attempt + 1;

            if previous != Some(status.label()) {
                info!(
                    event_name = "reconcile.operation_polled",
                    correlation_id = %self.correlation_id,
                    kind = %descriptor.kind,
                    identity = %descriptor.identity,
                    operation = %handle.name,
                    status = status.label(),
                    attempt = polls,
                    "operation status changed"
                );
                previous = Some(status.label());
            }

            match status {
                OperationStatus::Done { error: None } => {
                    return Ok(OperationOutcome::Done { polls });
                }
                OperationStatus::Done { error: Some(error) } => {
                    error!(
                        event_name = "reconcile.operation_failed",
                        correlation_id = %self.correlation_id,
                        kind = %descriptor.kind,
                        identity = %descriptor.identity,
                        operation = %handle.name,
                        error = %error,
                        "operation finished with an error"
                    );
                    return Ok(OperationOutcome::Failed { error, polls });
                }
                OperationStatus::Pending | OperationStatus::Running => {}
            }

            if polls < policy.max_attempts {
                pause(policy, attempt).await;
            }
        }

        let last = previous.unwrap_or("PENDING");
        warn!(
            event_name = "reconcile.operation_timed_out",
            correlation_id = %self.correlation_id,
            kind = %descriptor.kind,
            identity = %descriptor.identity,
            operation = %handle.name,
            max_attempts = policy.max_attempts,
            "operation did not finish within the poll budget"
        );
        Ok(OperationOutcome::TimedOut { last, polls: policy.max_attempts })
    }

    async fn wait_for_ready(
        &self,
        descriptor: &ResourceDescriptor,
        action: ReconcileAction,
        polls_so_far: u32,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let policy = &self.readiness_policy;
        let mut polls = polls_so_far;
        let mut previous: Option<String> = None;

        for attempt in 0..policy.max_attempts {
            let state = match self.control_plane.get(descriptor).await? {
                Some(observed) => observed.state,
                None => ResourceState::Transient("NOT_FOUND".to_string()),
            };
            polls += 1;

            if previous.as_deref() != Some(state.label()) {
                info!(
                    event_name = "reconcile.state_observed",
                    correlation_id = %self.correlation_id,
                    kind = %descriptor.kind,
                    identity = %descriptor.identity,
                    state = state.label(),
                    attempt = attempt + 1,
                    "resource state changed"
                );
                previous = Some(state.label().to_string());
            }

            match state {
                ResourceState::Ready(label) => {
                    info!(
                        event_name = "reconcile.ready",
                        correlation_id = %self.correlation_id,
                        kind = %descriptor.kind,
                        identity = %descriptor.identity,
                        state = label.as_str(),
                        "resource is ready"
                    );
                    return Ok(ReconciliationResult::ready(descriptor, label, action, polls));
                }
                ResourceState::Failed(label) => {
                    error!(
                        event_name = "reconcile.terminal_failure",
                        correlation_id = %self.correlation_id,
                        kind = %descriptor.kind,
                        identity = %descriptor.identity,
                        state = label.as_str(),
                        "resource entered a non-recoverable state"
                    );
                    let error = format!("resource is in non-recoverable state {label}");
                    return Ok(ReconciliationResult::failed(
                        descriptor, label, error, action, polls,
                    ));
                }
                ResourceState::Transient(_) => {}
            }

            if attempt + 1 < policy.max_attempts {
                pause(policy, attempt).await;
            }
        }

        let last = previous.unwrap_or_else(|| "UNKNOWN".to_string());
        warn!(
            event_name = "reconcile.readiness_timed_out",
            correlation_id = %self.correlation_id,
            kind = %descriptor.kind,
            identity = %descriptor.identity,
            last_state = last.as_str(),
            max_attempts = policy.max_attempts,
            "resource did not become ready within the poll budget"
        );
        Ok(ReconciliationResult::failed(
            descriptor,
            STATE_TIMED_OUT,
            format!("resource still {last} after {} polls", policy.max_attempts),
            action,
            polls,
        ))
    }
}

async fn pause(policy: &PollPolicy, attempt: u32) {
    let delay = policy.delay(attempt);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{PollPolicy, ReconcileError, Reconciler};
    use crate::domain::operation::{OperationStatus, ReconcileAction, STATE_TIMED_OUT};
    use crate::domain::resource::{keys, ObservedResource, ResourceDescriptor, ResourceKind};
    use crate::errors::ControlPlaneError;
    use crate::reconcile::memory::InMemoryControlPlane;

    fn instance_descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Instance, "pg-main")
            .with(keys::DATABASE_VERSION, "POSTGRES_14")
            .enforce(keys::IAM_AUTHENTICATION_FLAG, "on")
    }

    fn reconciler(control_plane: &Arc<InMemoryControlPlane>) -> Reconciler {
        Reconciler::new(control_plane.clone(), PollPolicy::immediate(10))
            .with_correlation_id("test-run")
    }

    #[tokio::test]
    async fn ready_resource_is_left_untouched() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .seed(
                ResourceKind::Instance,
                "pg-main",
                vec![ObservedResource::ready("RUNNABLE")
                    .with_config(keys::IAM_AUTHENTICATION_FLAG, "on")],
            )
            .await;

        let result = reconciler(&control_plane)
            .ensure(&instance_descriptor())
            .await
            .expect("ensure should succeed");

        assert!(result.success);
        assert_eq!(result.final_state, "RUNNABLE");
        assert_eq!(result.action, ReconcileAction::None);
        assert_eq!(result.polls, 0);

        let calls = control_plane.calls().await;
        assert_eq!(calls.creates, 0);
        assert_eq!(calls.patches, 0);
        assert_eq!(calls.operation_polls, 0);
        assert_eq!(calls.gets, 1);
    }

    #[tokio::test]
    async fn absent_resource_is_created_once_and_polled_to_ready() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .script_create(
                ResourceKind::Instance,
                "pg-main",
                vec![
                    OperationStatus::Pending,
                    OperationStatus::Running,
                    OperationStatus::Done { error: None },
                ],
                vec![
                    ObservedResource::transient("PENDING_CREATE"),
                    ObservedResource::ready("RUNNABLE"),
                ],
            )
            .await;

        let result = reconciler(&control_plane)
            .ensure(&instance_descriptor())
            .await
            .expect("ensure should succeed");

        assert!(result.success, "unexpected result: {result:?}");
        assert_eq!(result.final_state, "RUNNABLE");
        assert_eq!(result.action, ReconcileAction::Created);
        assert_eq!(result.polls, 5, "three operation polls and two readiness polls");

        let calls = control_plane.calls().await;
        assert_eq!(calls.creates, 1);
        assert_eq!(calls.patches, 0);
        assert_eq!(calls.operation_polls, 3);
    }

    #[tokio::test]
    async fn failed_resource_reports_failure_without_polling() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .seed(ResourceKind::Instance, "pg-main", vec![ObservedResource::failed("SUSPENDED")])
            .await;

        let result = reconciler(&control_plane)
            .ensure(&instance_descriptor())
            .await
            .expect("ensure should return a result");

        assert!(!result.success);
        assert_eq!(result.final_state, "SUSPENDED");
        assert!(result.error.as_deref().unwrap_or_default().contains("SUSPENDED"));

        let calls = control_plane.calls().await;
        assert_eq!(calls.gets, 1);
        assert_eq!(calls.creates, 0);
        assert_eq!(calls.patches, 0);
        assert_eq!(calls.operation_polls, 0);
    }

    #[tokio::test]
    async fn drifted_flag_triggers_single_patch() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .seed(
                ResourceKind::Instance,
                "pg-main",
                vec![ObservedResource::ready("RUNNABLE")
                    .with_config(keys::flag("max_connections"), "100")],
            )
            .await;
        control_plane
            .script_patch(
                ResourceKind::Instance,
                "pg-main",
                vec![OperationStatus::Running, OperationStatus::Done { error: None }],
                vec![ObservedResource::ready("RUNNABLE")
                    .with_config(keys::IAM_AUTHENTICATION_FLAG, "on")],
            )
            .await;

        let result = reconciler(&control_plane)
            .ensure(&instance_descriptor())
            .await
            .expect("ensure should succeed");

        assert!(result.success);
        assert_eq!(result.action, ReconcileAction::Patched);

        let calls = control_plane.calls().await;
        assert_eq!(calls.patches, 1);
        assert_eq!(calls.creates, 0);
        assert_eq!(
            control_plane.last_patch_keys().await,
            vec!["flag.cloudsql.iam_authentication".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_operation_skips_readiness_wait() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .script_create(
                ResourceKind::Instance,
                "pg-main",
                vec![
                    OperationStatus::Running,
                    OperationStatus::Done { error: Some("quota exceeded".to_string()) },
                ],
                vec![ObservedResource::ready("RUNNABLE")],
            )
            .await;

        let result = reconciler(&control_plane)
            .ensure(&instance_descriptor())
            .await
            .expect("ensure should return a result");

        assert!(!result.success);
        assert_eq!(result.final_state, "OPERATION_FAILED");
        assert_eq!(result.error.as_deref(), Some("quota exceeded"));

        let calls = control_plane.calls().await;
        assert_eq!(calls.gets, 1, "no readiness polls after a failed operation");
    }

    #[tokio::test]
    async fn poll_budget_bounds_transient_states() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .seed(ResourceKind::Instance, "pg-main", vec![ObservedResource::transient("MAINTENANCE")])
            .await;

        let result = Reconciler::new(control_plane.clone(), PollPolicy::immediate(4))
            .ensure(
                &ResourceDescriptor::new(ResourceKind::Instance, "pg-main")
                    .with(keys::DATABASE_VERSION, "POSTGRES_14"),
            )
            .await
            .expect("ensure should return a result");

        assert!(!result.success);
        assert_eq!(result.final_state, STATE_TIMED_OUT);
        assert_eq!(result.polls, 4);
        assert_eq!(control_plane.calls().await.gets, 5);
    }

    #[tokio::test]
    async fn stuck_operation_times_out() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .script_create(
                ResourceKind::Bucket,
                "docs",
                vec![OperationStatus::Running],
                vec![ObservedResource::ready("READY")],
            )
            .await;

        let result = Reconciler::new(control_plane.clone(), PollPolicy::immediate(3))
            .ensure(&ResourceDescriptor::new(ResourceKind::Bucket, "docs"))
            .await
            .expect("ensure should return a result");

        assert!(!result.success);
        assert_eq!(result.final_state, STATE_TIMED_OUT);
        assert!(result.error.as_deref().unwrap_or_default().contains("RUNNING"));
        assert_eq!(control_plane.calls().await.operation_polls, 3);
    }

    #[tokio::test]
    async fn not_found_during_readiness_wait_is_transient() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .script_create(
                ResourceKind::Database,
                "pg-main/taxi",
                vec![OperationStatus::Done { error: None }],
                vec![],
            )
            .await;
        control_plane.hide_after_create(ResourceKind::Database, "pg-main/taxi", 2).await;

        let result = reconciler(&control_plane)
            .ensure(&ResourceDescriptor::database("pg-main", "taxi"))
            .await
            .expect("ensure should succeed");

        assert!(result.success);
        assert_eq!(result.final_state, "READY");
        assert_eq!(result.polls, 4, "one operation poll, two misses, one hit");
    }

    #[tokio::test]
    async fn control_plane_errors_are_fatal() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .fail_get(
                ResourceKind::Instance,
                "pg-main",
                ControlPlaneError::Api { status: 403, body: "forbidden".to_string() },
            )
            .await;

        let error = reconciler(&control_plane)
            .ensure(&instance_descriptor())
            .await
            .expect_err("403 should propagate");

        assert_eq!(
            error,
            ReconcileError::ControlPlane(ControlPlaneError::Api {
                status: 403,
                body: "forbidden".to_string()
            })
        );
        assert_eq!(control_plane.calls().await.creates, 0);
    }

    #[tokio::test]
    async fn ensure_all_stops_at_first_failure() {
        let control_plane = Arc::new(InMemoryControlPlane::default());
        control_plane
            .seed(ResourceKind::Instance, "pg-main", vec![ObservedResource::failed("FAILED")])
            .await;

        let results = reconciler(&control_plane)
            .ensure_all(&[
                ResourceDescriptor::new(ResourceKind::Bucket, "docs"),
                instance_descriptor(),
                ResourceDescriptor::database("pg-main", "taxi"),
            ])
            .await
            .expect("ensure_all should return results");

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].action, ReconcileAction::Created);
        assert!(!results[1].success);
        assert_eq!(control_plane.calls().await.creates, 1);
    }
}
