//! Stateless per-instance view over the compute API.
//!
//! Every remote call is wrapped by the [`RetryPolicy`], and every mutating
//! call returns an [`Operation`] consumed through [`wait_for`]
//! (`InstanceClient::wait_for`). Guard conditions make repeated invocation
//! safe: `start` and `stop` skip when the instance is already in the target
//! state, and snapshot names embed a timestamp so creation requests stay
//! unique.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::api::{ApiError, ComputeApi};
use crate::model::{InstanceDescriptor, Operation, OperationStatus, SnapshotRecord};
use crate::retry::RetryPolicy;
use crate::waiter::{OperationWaiter, WaitOutcome};

const SNAPSHOT_NAME_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

/// Client bound to one instance identity.
#[derive(Clone, Debug)]
pub struct InstanceClient<C: ComputeApi> {
    api: Arc<C>,
    instance_id: String,
    retry: RetryPolicy,
    waiter: OperationWaiter,
}

impl<C: ComputeApi> InstanceClient<C> {
    /// Creates a client for `instance_id`.
    #[must_use]
    pub fn new(
        api: Arc<C>,
        instance_id: impl Into<String>,
        retry: RetryPolicy,
        waiter: OperationWaiter,
    ) -> Self {
        Self {
            api,
            instance_id: instance_id.into(),
            retry,
            waiter,
        }
    }

    /// Identity this client operates on.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Fetches the current descriptor, `None` when the instance does not
    /// exist remotely.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the remote call fails after retries.
    pub async fn fetch(&self) -> Result<Option<InstanceDescriptor>, ApiError> {
        let descriptor = self
            .retry
            .execute(|| self.api.get_instance(&self.instance_id))
            .await?;
        if descriptor.is_none() {
            warn!(instance_id = %self.instance_id, "instance does not exist");
        }
        Ok(descriptor)
    }

    /// Issues a start request, skipping when the instance is already up or
    /// coming up.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the state fetch or the start request fails.
    pub async fn start(&self) -> Result<Operation, ApiError> {
        if let Some(descriptor) = self.fetch().await? {
            if descriptor.state.is_positive() {
                warn!(
                    instance = %descriptor.name,
                    state = %descriptor.state,
                    "instance already active, skipping start"
                );
                return Ok(Operation::NoOp);
            }
        }
        let operation = self
            .retry
            .execute(|| self.api.start_instance(&self.instance_id))
            .await?;
        info!(instance_id = %self.instance_id, "starting instance");
        Ok(operation)
    }

    /// Issues a stop request, skipping when the instance is already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the state fetch or the stop request fails.
    pub async fn stop(&self) -> Result<Operation, ApiError> {
        if let Some(descriptor) = self.fetch().await? {
            if descriptor.state == crate::model::InstanceState::Stopped {
                info!(instance = %descriptor.name, "instance already stopped");
                return Ok(Operation::NoOp);
            }
        }
        let operation = self
            .retry
            .execute(|| self.api.stop_instance(&self.instance_id))
            .await?;
        info!(instance_id = %self.instance_id, "stopping instance");
        Ok(operation)
    }

    /// Requests a snapshot of the boot disk. Always fires regardless of
    /// state; the timestamped name keeps repeated requests distinct.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Quota`] when the provider rejects with 429, or
    /// any other [`ApiError`] from the request. Quota errors are never
    /// retried.
    pub async fn create_snapshot(
        &self,
        descriptor: &InstanceDescriptor,
    ) -> Result<Operation, ApiError> {
        let name = format!(
            "{}-{}",
            descriptor.name,
            Utc::now().format(SNAPSHOT_NAME_FORMAT)
        );
        let result = self
            .retry
            .execute(|| {
                self.api
                    .create_snapshot(&descriptor.folder_id, &descriptor.boot_disk_id, &name)
            })
            .await;
        match result {
            Ok(operation) => {
                info!(
                    instance = %descriptor.name,
                    boot_disk = %descriptor.boot_disk_id,
                    snapshot = %name,
                    "creating snapshot of boot disk"
                );
                Ok(operation)
            }
            Err(err @ ApiError::Quota { .. }) => {
                error!(
                    instance = %descriptor.name,
                    %err,
                    "snapshot not created, quota exceeded"
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Requests deletion of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the request fails after retries.
    pub async fn delete_snapshot(&self, snapshot: &SnapshotRecord) -> Result<Operation, ApiError> {
        let operation = self
            .retry
            .execute(|| self.api.delete_snapshot(&snapshot.id))
            .await?;
        info!(snapshot = %snapshot.name, "deleting snapshot");
        Ok(operation)
    }

    /// Lists the snapshots taken from this instance's boot disk.
    ///
    /// The folder listing is filtered client-side because the remote API
    /// scopes snapshots by folder, not by source disk.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the listing fails after retries.
    pub async fn list_snapshots(
        &self,
        descriptor: &InstanceDescriptor,
    ) -> Result<Vec<SnapshotRecord>, ApiError> {
        let snapshots = self
            .retry
            .execute(|| self.api.list_snapshots(&descriptor.folder_id))
            .await?;
        Ok(snapshots
            .into_iter()
            .filter(|snapshot| snapshot.source_disk_id == descriptor.boot_disk_id)
            .collect())
    }

    /// Re-fetches the completion flag of an operation.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the poll fails after retries.
    pub async fn poll_operation(&self, operation_id: &str) -> Result<OperationStatus, ApiError> {
        self.retry
            .execute(|| self.api.get_operation(operation_id))
            .await
    }

    /// Waits for `operation` to complete or time out. A no-op completes
    /// immediately without polling.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when a poll fails after retries.
    pub async fn wait_for(&self, operation: &Operation) -> Result<WaitOutcome, ApiError> {
        let Operation::Issued { id, .. } = operation else {
            info!(instance_id = %self.instance_id, "operation was a no-op, nothing to wait for");
            return Ok(WaitOutcome::Completed);
        };
        self.waiter
            .wait(operation, || async move { self.poll_operation(id).await })
            .await
    }
}
