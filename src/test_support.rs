//! Test support utilities shared across unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::api::{ApiError, ApiFuture, ComputeApi};
use crate::model::{InstanceDescriptor, InstanceState, Operation, OperationStatus, SnapshotRecord};

/// In-memory [`ComputeApi`] double with a recorded call log.
///
/// Mutating calls transition instance state immediately and issue an
/// operation handle that reports `done` after a configurable number of
/// polls. Failures can be scripted per method in FIFO order.
#[derive(Debug)]
pub struct FakeCompute {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    instances: HashMap<String, InstanceDescriptor>,
    snapshots: Vec<SnapshotRecord>,
    operations: HashMap<String, usize>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    op_counter: usize,
    polls_until_done: usize,
}

impl Default for FakeCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCompute {
    /// Creates an empty fake where every operation completes on its first
    /// poll.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                polls_until_done: 1,
                ..FakeState::default()
            }),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers an instance descriptor.
    pub fn add_instance(&self, descriptor: InstanceDescriptor) {
        let mut state = self.locked();
        state.instances.insert(descriptor.id.clone(), descriptor);
    }

    /// Registers a snapshot record returned by folder listings.
    pub fn add_snapshot(&self, snapshot: SnapshotRecord) {
        self.locked().snapshots.push(snapshot);
    }

    /// Sets how many polls an operation takes before reporting done.
    pub fn set_polls_until_done(&self, polls: usize) {
        self.locked().polls_until_done = polls;
    }

    /// Queues a failure for the next invocation of `method`
    /// (for example `"stop_instance"`).
    pub fn script_failure(&self, method: &'static str, error: ApiError) {
        self.locked()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Current state of a registered instance.
    #[must_use]
    pub fn instance_state(&self, instance_id: &str) -> Option<InstanceState> {
        self.locked()
            .instances
            .get(instance_id)
            .map(|descriptor| descriptor.state)
    }

    /// Snapshot ids currently known to the fake.
    #[must_use]
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.locked()
            .snapshots
            .iter()
            .map(|snapshot| snapshot.id.clone())
            .collect()
    }

    /// Full call log in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.locked().calls.clone()
    }

    /// Call log filtered to entries starting with `prefix`.
    #[must_use]
    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn take_failure(state: &mut FakeState, method: &'static str) -> Option<ApiError> {
        state.failures.get_mut(method).and_then(VecDeque::pop_front)
    }

    fn issue_operation(state: &mut FakeState, description: &str) -> Operation {
        state.op_counter += 1;
        let id = format!("op-{}", state.op_counter);
        state.operations.insert(id.clone(), state.polls_until_done);
        Operation::Issued {
            id,
            description: description.to_owned(),
        }
    }

    fn set_state(state: &mut FakeState, instance_id: &str, new_state: InstanceState) {
        if let Some(descriptor) = state.instances.get_mut(instance_id) {
            descriptor.state = new_state;
        }
    }
}

impl ComputeApi for FakeCompute {
    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ApiFuture<'a, Option<InstanceDescriptor>> {
        Box::pin(async move {
            let mut state = self.locked();
            state.calls.push(format!("get {instance_id}"));
            if let Some(error) = Self::take_failure(&mut state, "get_instance") {
                return Err(error);
            }
            Ok(state.instances.get(instance_id).cloned())
        })
    }

    fn start_instance<'a>(&'a self, instance_id: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let mut state = self.locked();
            state.calls.push(format!("start {instance_id}"));
            if let Some(error) = Self::take_failure(&mut state, "start_instance") {
                return Err(error);
            }
            Self::set_state(&mut state, instance_id, InstanceState::Running);
            Ok(Self::issue_operation(&mut state, "start instance"))
        })
    }

    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let mut state = self.locked();
            state.calls.push(format!("stop {instance_id}"));
            if let Some(error) = Self::take_failure(&mut state, "stop_instance") {
                return Err(error);
            }
            Self::set_state(&mut state, instance_id, InstanceState::Stopped);
            Ok(Self::issue_operation(&mut state, "stop instance"))
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        folder_id: &'a str,
        disk_id: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let mut state = self.locked();
            state
                .calls
                .push(format!("create_snapshot {folder_id} {disk_id} {name}"));
            if let Some(error) = Self::take_failure(&mut state, "create_snapshot") {
                return Err(error);
            }
            let record = SnapshotRecord {
                id: format!("snap-{}", state.snapshots.len() + 1),
                name: name.to_owned(),
                source_disk_id: disk_id.to_owned(),
                created_at: Utc::now(),
            };
            state.snapshots.push(record);
            Ok(Self::issue_operation(&mut state, "create snapshot"))
        })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let mut state = self.locked();
            state.calls.push(format!("delete_snapshot {snapshot_id}"));
            if let Some(error) = Self::take_failure(&mut state, "delete_snapshot") {
                return Err(error);
            }
            state.snapshots.retain(|snapshot| snapshot.id != snapshot_id);
            Ok(Self::issue_operation(&mut state, "delete snapshot"))
        })
    }

    fn list_snapshots<'a>(&'a self, folder_id: &'a str) -> ApiFuture<'a, Vec<SnapshotRecord>> {
        Box::pin(async move {
            let mut state = self.locked();
            state.calls.push(format!("list {folder_id}"));
            if let Some(error) = Self::take_failure(&mut state, "list_snapshots") {
                return Err(error);
            }
            Ok(state.snapshots.clone())
        })
    }

    fn get_operation<'a>(&'a self, operation_id: &'a str) -> ApiFuture<'a, OperationStatus> {
        Box::pin(async move {
            let mut state = self.locked();
            state.calls.push(format!("poll {operation_id}"));
            if let Some(error) = Self::take_failure(&mut state, "get_operation") {
                return Err(error);
            }
            let remaining =
                state
                    .operations
                    .get_mut(operation_id)
                    .ok_or_else(|| ApiError::Rejected {
                        status: 404,
                        message: format!("unknown operation {operation_id}"),
                    })?;
            *remaining = remaining.saturating_sub(1);
            Ok(OperationStatus {
                done: *remaining == 0,
                description: String::from("fake operation"),
            })
        })
    }
}

/// Builds a descriptor for tests.
#[must_use]
pub fn descriptor(id: &str, state: InstanceState) -> InstanceDescriptor {
    InstanceDescriptor {
        id: id.to_owned(),
        folder_id: String::from("folder-1"),
        name: format!("{id}-name"),
        boot_disk_id: format!("{id}-disk"),
        state,
    }
}

/// Builds a snapshot record for tests.
#[must_use]
pub fn snapshot_record(
    id: &str,
    source_disk_id: &str,
    created_at: DateTime<Utc>,
) -> SnapshotRecord {
    SnapshotRecord {
        id: id.to_owned(),
        name: format!("{id}-name"),
        source_disk_id: source_disk_id.to_owned(),
        created_at,
    }
}
