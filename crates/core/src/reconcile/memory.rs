use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::operation::{OperationHandle, OperationStatus, Submission};
use crate::domain::resource::{ConfigDrift, ObservedResource, ResourceDescriptor, ResourceKind};
use crate::errors::ControlPlaneError;
use crate::reconcile::ControlPlane;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: u32,
    pub creates: u32,
    pub patches: u32,
    pub operation_polls: u32,
}

#[derive(Clone, Debug, Default)]
struct Script {
    statuses: Vec<OperationStatus>,
    after: Vec<ObservedResource>,
}

#[derive(Debug, Default)]
struct Entry {
    states: VecDeque<ObservedResource>,
    hidden: u32,
    hide_after_create: u32,
    get_error: Option<ControlPlaneError>,
    create: Option<Script>,
    patch: Option<Script>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<(ResourceKind, String), Entry>,
    operations: HashMap<String, VecDeque<OperationStatus>>,
    calls: CallCounts,
    last_patch: Vec<String>,
    next_operation: u64,
}

impl State {
    fn entry(&mut self, kind: ResourceKind, identity: &str) -> &mut Entry {
        self.entries.entry((kind, identity.to_string())).or_default()
    }

    fn submit(&mut self, kind: ResourceKind, statuses: Vec<OperationStatus>) -> Submission {
        if statuses.is_empty() {
            return Submission::Completed;
        }
        self.next_operation += 1;
        let name = format!("operations/op-{}", self.next_operation);
        self.operations.insert(name.clone(), statuses.into());
        Submission::Pending(OperationHandle::new(kind, name))
    }
}

/// Scripted control plane for exercising the reconciler without a provider.
///
/// Observed states are served in order and the last one repeats. Unscripted
/// creates complete synchronously and leave the resource `READY`.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub async fn seed(
        &self,
        kind: ResourceKind,
        identity: &str,
        states: Vec<ObservedResource>,
    ) {
        let mut state = self.state.lock().await;
        state.entry(kind, identity).states = states.into();
    }

    pub async fn script_create(
        &self,
        kind: ResourceKind,
        identity: &str,
        statuses: Vec<OperationStatus>,
        after: Vec<ObservedResource>,
    ) {
        let mut state = self.state.lock().await;
        state.entry(kind, identity).create = Some(Script { statuses, after });
    }

    pub async fn script_patch(
        &self,
        kind: ResourceKind,
        identity: &str,
        statuses: Vec<OperationStatus>,
        after: Vec<ObservedResource>,
    ) {
        let mut state = self.state.lock().await;
        state.entry(kind, identity).patch = Some(Script { statuses, after });
    }

    /// The next `misses` lookups after a create report the resource as absent.
    pub async fn hide_after_create(&self, kind: ResourceKind, identity: &str, misses: u32) {
        let mut state = self.state.lock().await;
        state.entry(kind, identity).hide_after_create = misses;
    }

    pub async fn fail_get(&self, kind: ResourceKind, identity: &str, error: ControlPlaneError) {
        let mut state = self.state.lock().await;
        state.entry(kind, identity).get_error = Some(error);
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    /// Keys of the drift passed to the most recent patch.
    pub async fn last_patch_keys(&self) -> Vec<String> {
        self.state.lock().await.last_patch.clone()
    }
}

fn settled(after: Vec<ObservedResource>) -> VecDeque<ObservedResource> {
    if after.is_empty() {
        VecDeque::from([ObservedResource::ready("READY")])
    } else {
        after.into()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.gets += 1;
        let entry = state.entry(descriptor.kind, &descriptor.identity);

        if let Some(error) = &entry.get_error {
            return Err(error.clone());
        }
        if entry.hidden > 0 {
            entry.hidden -= 1;
            return Ok(None);
        }
        if entry.states.len() > 1 {
            return Ok(entry.states.pop_front());
        }
        Ok(entry.states.front().cloned())
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Submission, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.creates += 1;
        let entry = state.entry(descriptor.kind, &descriptor.identity);
        let script = entry.create.take().unwrap_or_default();
        entry.states = settled(script.after);
        entry.hidden = entry.hide_after_create;
        Ok(state.submit(descriptor.kind, script.statuses))
    }

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        observed: &ObservedResource,
        drift: &[ConfigDrift],
    ) -> Result<Submission, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.patches += 1;
        state.last_patch = drift.iter().map(|entry| entry.key.clone()).collect();
        let entry = state.entry(descriptor.kind, &descriptor.identity);
        let script = entry.patch.take().unwrap_or_default();
        entry.states = if script.after.is_empty() {
            let mut patched = observed.clone();
            for change in drift {
                patched.config.insert(change.key.clone(), change.desired.clone());
            }
            VecDeque::from([patched])
        } else {
            script.after.into()
        };
        Ok(state.submit(descriptor.kind, script.statuses))
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.operation_polls += 1;
        let Some(statuses) = state.operations.get_mut(&handle.name) else {
            return Err(ControlPlaneError::Api {
                status: 404,
                body: format!("unknown operation `{}`", handle.name),
            });
        };
        let status = if statuses.len() > 1 { statuses.pop_front() } else { statuses.front().cloned() };
        Ok(status.unwrap_or(OperationStatus::Done { error: None }))
    }
}
