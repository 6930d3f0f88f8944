//! Snapshot-pruning workflow: list, select expired, delete.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::api::{ApiError, ComputeApi};
use crate::instance::InstanceClient;
use crate::model::RetentionPolicy;
use crate::retry::RetryPolicy;
use crate::selector::select_expired;
use crate::waiter::OperationWaiter;

/// Deletes snapshots older than the retention threshold, per instance.
#[derive(Debug)]
pub struct SnapshotCleaner<C: ComputeApi> {
    api: Arc<C>,
    policy: RetentionPolicy,
    retry: RetryPolicy,
    waiter: OperationWaiter,
}

impl<C: ComputeApi> Clone for SnapshotCleaner<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            policy: self.policy,
            retry: self.retry,
            waiter: self.waiter,
        }
    }
}

impl<C> SnapshotCleaner<C>
where
    C: ComputeApi + Send + Sync + 'static,
{
    /// Creates a cleaner with default retry and wait settings.
    #[must_use]
    pub fn new(api: Arc<C>, policy: RetentionPolicy) -> Self {
        Self {
            api,
            policy,
            retry: RetryPolicy::default(),
            waiter: OperationWaiter::default(),
        }
    }

    /// Overrides the operation waiter, primarily for tests.
    #[must_use]
    pub const fn with_waiter(mut self, waiter: OperationWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    fn client(&self, instance_id: &str) -> InstanceClient<C> {
        InstanceClient::new(Arc::clone(&self.api), instance_id, self.retry, self.waiter)
    }

    /// Prunes expired snapshots one instance at a time.
    pub async fn run_sequential(&self, instance_ids: &[String]) {
        info!(
            lifetime_days = self.policy.lifetime_days(),
            "searching for and deleting snapshots older than the retention threshold"
        );
        for instance_id in instance_ids {
            if let Err(err) = self.clean_instance(instance_id).await {
                error!(%instance_id, %err, "cleanup failed for instance");
            }
        }
    }

    /// Prunes expired snapshots as one concurrent task per instance.
    pub async fn run_concurrent(&self, instance_ids: &[String]) {
        info!(
            lifetime_days = self.policy.lifetime_days(),
            "searching for and deleting expired snapshots concurrently"
        );
        let mut tasks = JoinSet::new();
        for instance_id in instance_ids {
            let workflow = self.clone();
            let instance_id = instance_id.clone();
            tasks.spawn(async move {
                if let Err(err) = workflow.clean_instance(&instance_id).await {
                    error!(%instance_id, %err, "cleanup failed for instance");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn clean_instance(&self, instance_id: &str) -> Result<(), ApiError> {
        let client = self.client(instance_id);
        let Some(descriptor) = client.fetch().await? else {
            warn!(%instance_id, "skipping unresolved instance");
            return Ok(());
        };

        let snapshots = client.list_snapshots(&descriptor).await?;
        let expired = select_expired(&snapshots, self.policy, Utc::now());
        if expired.is_empty() {
            info!(instance = %descriptor.name, "no expired snapshots");
            return Ok(());
        }

        for snapshot in &expired {
            let deletion = client.delete_snapshot(snapshot).await?;
            client.wait_for(&deletion).await?;
        }
        info!(
            instance = %descriptor.name,
            deleted = expired.len(),
            "expired snapshots deleted"
        );
        Ok(())
    }
}
