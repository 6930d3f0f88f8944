//! Snapshot-creation workflow: stop, snapshot, restart.
//!
//! Per instance the workflow stops the machine (skipped when it is already
//! down), snapshots its boot disk, and restarts it only when this run was
//! the one that stopped it. A wait timeout is treated as
//! success-to-proceed; see [`crate::waiter::WaitOutcome`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::api::{ApiError, ComputeApi};
use crate::instance::InstanceClient;
use crate::retry::RetryPolicy;
use crate::waiter::OperationWaiter;

/// Orchestrates snapshot creation across the configured instances.
#[derive(Debug)]
pub struct SnapshotCreator<C: ComputeApi> {
    api: Arc<C>,
    retry: RetryPolicy,
    waiter: OperationWaiter,
}

impl<C: ComputeApi> Clone for SnapshotCreator<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            retry: self.retry,
            waiter: self.waiter,
        }
    }
}

impl<C> SnapshotCreator<C>
where
    C: ComputeApi + Send + Sync + 'static,
{
    /// Creates a workflow with default retry and wait settings.
    #[must_use]
    pub fn new(api: Arc<C>) -> Self {
        Self {
            api,
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

    /// Overrides the retry policy, primarily for tests.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn client(&self, instance_id: &str) -> InstanceClient<C> {
        InstanceClient::new(Arc::clone(&self.api), instance_id, self.retry, self.waiter)
    }

    /// Runs the workflow one instance at a time, each processed to
    /// completion before the next begins. One instance's failure never
    /// blocks the rest of the batch.
    pub async fn run_sequential(&self, instance_ids: &[String]) {
        info!("creating snapshots");
        for instance_id in instance_ids {
            match self.snapshot_phase(instance_id).await {
                Ok(true) => {
                    if let Err(err) = self.restore_phase(instance_id).await {
                        error!(%instance_id, %err, "failed to restart instance");
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    error!(%instance_id, %err, "snapshot workflow failed for instance");
                }
            }
        }
    }

    /// Runs the workflow as one concurrent task per instance.
    ///
    /// The stop-and-snapshot fan-out collects the instances this run
    /// stopped through a channel; a second fan-out restarts exactly those
    /// once every creation task has finished, preserving the per-instance
    /// stop → snapshot → start ordering without any cross-instance
    /// coordination.
    pub async fn run_concurrent(&self, instance_ids: &[String]) {
        info!("creating snapshots concurrently");
        let (stopped_tx, mut stopped_rx) = mpsc::unbounded_channel::<String>();

        let mut creations = JoinSet::new();
        for instance_id in instance_ids {
            let workflow = self.clone();
            let instance_id = instance_id.clone();
            let stopped_tx = stopped_tx.clone();
            creations.spawn(async move {
                match workflow.snapshot_phase(&instance_id).await {
                    Ok(true) => {
                        stopped_tx.send(instance_id).ok();
                    }
                    Ok(false) => {}
                    Err(err) => {
                        error!(%instance_id, %err, "snapshot workflow failed for instance");
                    }
                }
            });
        }
        drop(stopped_tx);
        while creations.join_next().await.is_some() {}

        let mut stopped_by_us = Vec::new();
        while let Some(instance_id) = stopped_rx.recv().await {
            stopped_by_us.push(instance_id);
        }

        let mut restarts = JoinSet::new();
        for instance_id in stopped_by_us {
            let workflow = self.clone();
            restarts.spawn(async move {
                if let Err(err) = workflow.restore_phase(&instance_id).await {
                    error!(%instance_id, %err, "failed to restart instance");
                }
            });
        }
        while restarts.join_next().await.is_some() {}
    }

    /// Logs the current descriptor of every configured instance.
    pub async fn report_status_all(&self, instance_ids: &[String]) {
        info!("getting instance status");
        for instance_id in instance_ids {
            if let Err(err) = self.report_status(instance_id).await {
                error!(%instance_id, %err, "failed to fetch status");
            }
        }
    }

    /// Stop-and-snapshot steps for one instance.
    ///
    /// Returns whether this run stopped the instance, which decides whether
    /// the restore phase applies.
    async fn snapshot_phase(&self, instance_id: &str) -> Result<bool, ApiError> {
        let client = self.client(instance_id);
        let Some(descriptor) = client.fetch().await? else {
            warn!(%instance_id, "skipping unresolved instance");
            return Ok(false);
        };

        let stopped_by_us = if descriptor.state.is_negative() {
            info!(instance = %descriptor.name, state = %descriptor.state, "instance already down, skipping stop");
            false
        } else {
            let stop = client.stop().await?;
            client.wait_for(&stop).await?;
            true
        };

        let snapshot = client.create_snapshot(&descriptor).await?;
        client.wait_for(&snapshot).await?;
        Ok(stopped_by_us)
    }

    /// Restores the pre-workflow running state.
    async fn restore_phase(&self, instance_id: &str) -> Result<(), ApiError> {
        let client = self.client(instance_id);
        let start = client.start().await?;
        client.wait_for(&start).await?;
        Ok(())
    }

    async fn report_status(&self, instance_id: &str) -> Result<(), ApiError> {
        let client = self.client(instance_id);
        if let Some(descriptor) = client.fetch().await? {
            info!(
                instance_id = %descriptor.id,
                folder_id = %descriptor.folder_id,
                name = %descriptor.name,
                boot_disk = %descriptor.boot_disk_id,
                state = %descriptor.state,
                "instance status"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceState;
    use crate::test_support::{FakeCompute, descriptor};
    use rstest::{fixture, rstest};

    #[fixture]
    fn api() -> Arc<FakeCompute> {
        Arc::new(FakeCompute::new())
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    /// Mutating calls and polls in order, dropping reads.
    fn workflow_sequence(api: &FakeCompute) -> Vec<String> {
        api.calls()
            .into_iter()
            .filter(|call| !call.starts_with("get ") && !call.starts_with("list "))
            .collect()
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn running_instance_is_stopped_snapshotted_and_restarted(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow.run_sequential(&ids(&["i-1"])).await;

        let sequence = workflow_sequence(&api);
        assert_eq!(sequence.len(), 6, "three mutations, each awaited: {sequence:?}");
        assert!(sequence[0].starts_with("stop i-1"));
        assert!(sequence[1].starts_with("poll "));
        assert!(sequence[2].starts_with("create_snapshot folder-1 i-1-disk"));
        assert!(sequence[3].starts_with("poll "));
        assert!(sequence[4].starts_with("start i-1"));
        assert!(sequence[5].starts_with("poll "));
        assert_eq!(api.instance_state("i-1"), Some(InstanceState::Running));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn stopped_instance_is_only_snapshotted(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Stopped));
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow.run_sequential(&ids(&["i-1"])).await;

        let sequence = workflow_sequence(&api);
        assert_eq!(sequence.len(), 2, "snapshot and its await only: {sequence:?}");
        assert!(sequence[0].starts_with("create_snapshot "));
        assert!(sequence[1].starts_with("poll "));
        assert_eq!(api.instance_state("i-1"), Some(InstanceState::Stopped));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn unresolved_instance_is_skipped_without_blocking_the_batch(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-2", InstanceState::Stopped));
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow.run_sequential(&ids(&["i-ghost", "i-2"])).await;

        assert_eq!(api.calls_with_prefix("create_snapshot ").len(), 1);
        assert!(api.calls_with_prefix("stop i-ghost").is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn one_failing_instance_does_not_block_the_rest(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        api.add_instance(descriptor("i-2", InstanceState::Running));
        api.script_failure(
            "stop_instance",
            crate::api::ApiError::Rejected {
                status: 500,
                message: String::from("internal"),
            },
        );
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow.run_sequential(&ids(&["i-1", "i-2"])).await;

        // i-1's stop failed, so only i-2 was snapshotted.
        let creations = api.calls_with_prefix("create_snapshot ");
        assert_eq!(creations.len(), 1);
        assert!(creations[0].contains("i-2-disk"), "calls: {creations:?}");
        assert_eq!(api.instance_state("i-2"), Some(InstanceState::Running));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn concurrent_run_restarts_only_instances_it_stopped(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        api.add_instance(descriptor("i-2", InstanceState::Stopped));
        api.add_instance(descriptor("i-3", InstanceState::Running));
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow
            .run_concurrent(&ids(&["i-1", "i-2", "i-3"]))
            .await;

        assert_eq!(api.calls_with_prefix("create_snapshot ").len(), 3);
        assert_eq!(api.calls_with_prefix("start i-1").len(), 1);
        assert!(api.calls_with_prefix("start i-2").is_empty());
        assert_eq!(api.calls_with_prefix("start i-3").len(), 1);
        assert_eq!(api.instance_state("i-1"), Some(InstanceState::Running));
        assert_eq!(api.instance_state("i-2"), Some(InstanceState::Stopped));
        assert_eq!(api.instance_state("i-3"), Some(InstanceState::Running));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn timed_out_waits_do_not_abort_the_workflow(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        // Operations never report done, so every wait gives up at the
        // ceiling and the workflow proceeds regardless.
        api.set_polls_until_done(usize::MAX);
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow.run_sequential(&ids(&["i-1"])).await;

        assert_eq!(api.calls_with_prefix("stop i-1").len(), 1);
        assert_eq!(api.calls_with_prefix("create_snapshot ").len(), 1);
        assert_eq!(api.calls_with_prefix("start i-1").len(), 1);
        assert_eq!(
            api.calls_with_prefix("poll ").len(),
            900,
            "three waits, each polling to the ceiling"
        );
        assert_eq!(api.instance_state("i-1"), Some(InstanceState::Running));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn sequential_run_leaves_status_reporting_to_the_caller(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Stopped));
        let workflow = SnapshotCreator::new(Arc::clone(&api));

        workflow.run_sequential(&ids(&["i-1"])).await;
        assert_eq!(
            api.calls_with_prefix("get i-1").len(),
            1,
            "one workflow fetch, no status pass of its own"
        );

        workflow.report_status_all(&ids(&["i-1"])).await;
        assert_eq!(api.calls_with_prefix("get i-1").len(), 2);
    }
}
