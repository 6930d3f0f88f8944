//! Supervisory loop that restarts instances found in a watched state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::api::ComputeApi;
use crate::instance::InstanceClient;
use crate::model::InstanceState;
use crate::retry::RetryPolicy;
use crate::waiter::OperationWaiter;

const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// Watches a set of targets and issues a corrective start whenever one is
/// found in a watched (undesired) state.
///
/// Each target runs as its own task; tasks never communicate and only end
/// with the process.
#[derive(Debug)]
pub struct Watchdog<C: ComputeApi> {
    api: Arc<C>,
    delay: Duration,
    watched: Vec<InstanceState>,
    retry: RetryPolicy,
    waiter: OperationWaiter,
}

impl<C: ComputeApi> Clone for Watchdog<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            delay: self.delay,
            watched: self.watched.clone(),
            retry: self.retry,
            waiter: self.waiter,
        }
    }
}

impl<C> Watchdog<C>
where
    C: ComputeApi + Send + Sync + 'static,
{
    /// Creates a watchdog that treats `Stopped` as the fault state.
    #[must_use]
    pub fn new(api: Arc<C>) -> Self {
        Self {
            api,
            delay: DEFAULT_DELAY,
            watched: vec![InstanceState::Stopped],
            retry: RetryPolicy::default(),
            waiter: OperationWaiter::default(),
        }
    }

    /// Overrides the poll delay between checks.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the set of states treated as faults.
    #[must_use]
    pub fn with_watched_states(mut self, watched: Vec<InstanceState>) -> Self {
        self.watched = watched;
        self
    }

    fn client(&self, instance_id: &str) -> InstanceClient<C> {
        InstanceClient::new(Arc::clone(&self.api), instance_id, self.retry, self.waiter)
    }

    /// Drops targets whose descriptor cannot be resolved, returning the list
    /// the watch loop will actually poll.
    ///
    /// Built as a separate pass so the loop never polls an identity it
    /// could not resolve at startup.
    pub async fn resolve_targets(&self, target_ids: &[String]) -> Vec<String> {
        let mut resolved = Vec::new();
        for target_id in target_ids {
            match self.client(target_id).fetch().await {
                Ok(Some(_)) => resolved.push(target_id.clone()),
                Ok(None) => {
                    warn!(%target_id, "dropping unresolvable watch target");
                }
                Err(err) => {
                    error!(%target_id, %err, "dropping watch target after failed resolve");
                }
            }
        }
        resolved
    }

    /// Resolves targets and watches them until the process exits.
    ///
    /// Returns early only when no target resolves; otherwise the per-target
    /// loops run forever.
    pub async fn run(&self, target_ids: &[String]) {
        let targets = self.resolve_targets(target_ids).await;
        if targets.is_empty() {
            warn!("no resolvable watch targets, watchdog exiting");
            return;
        }

        info!(
            delay_secs = self.delay.as_secs(),
            targets = targets.len(),
            "watchdog started"
        );
        let mut tasks = JoinSet::new();
        for target_id in targets {
            let watchdog = self.clone();
            tasks.spawn(async move { watchdog.watch_target(&target_id).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Single-target loop: sleep, check, correct. Check failures are logged
    /// and the loop continues; nothing short of process exit ends it.
    async fn watch_target(&self, instance_id: &str) {
        let client = self.client(instance_id);
        loop {
            sleep(self.delay).await;
            match client.fetch().await {
                Ok(Some(descriptor)) if self.watched.contains(&descriptor.state) => {
                    info!(
                        instance = %descriptor.name,
                        state = %descriptor.state,
                        "target in watched state, restarting"
                    );
                    match client.start().await {
                        Ok(operation) => {
                            if let Err(err) = client.wait_for(&operation).await {
                                error!(%instance_id, %err, "corrective start did not complete");
                            }
                        }
                        Err(err) => {
                            error!(%instance_id, %err, "corrective start failed");
                        }
                    }
                }
                Ok(Some(_)) | Ok(None) => {}
                Err(err) => {
                    error!(%instance_id, %err, "watchdog check failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCompute, descriptor};
    use rstest::{fixture, rstest};

    #[fixture]
    fn api() -> Arc<FakeCompute> {
        Arc::new(FakeCompute::new())
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn stopped_target_is_restarted_on_the_next_check(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Stopped));
        let watchdog = Watchdog::new(Arc::clone(&api));

        let targets = ids(&["i-1"]);
        let handle = tokio::spawn(async move { watchdog.run(&targets).await });
        sleep(Duration::from_secs(45)).await;
        handle.abort();

        assert_eq!(api.calls_with_prefix("start i-1").len(), 1);
        assert_eq!(api.instance_state("i-1"), Some(InstanceState::Running));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn healthy_target_triggers_no_corrective_action(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        let watchdog = Watchdog::new(Arc::clone(&api));

        let targets = ids(&["i-1"]);
        let handle = tokio::spawn(async move { watchdog.run(&targets).await });
        // Five full check cycles at the default ten-second delay.
        sleep(Duration::from_secs(51)).await;
        handle.abort();

        assert!(api.calls_with_prefix("start ").is_empty());
        let checks = api.calls_with_prefix("get i-1").len();
        assert!(checks >= 6, "resolve plus five checks, saw {checks}");
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn target_stopping_between_checks_is_corrected(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        let watchdog = Watchdog::new(Arc::clone(&api));

        let targets = ids(&["i-1"]);
        let handle = tokio::spawn(async move { watchdog.run(&targets).await });
        sleep(Duration::from_secs(15)).await;
        assert!(api.calls_with_prefix("start ").is_empty());

        // Simulate an outside stop between two poll cycles.
        api.add_instance(descriptor("i-1", InstanceState::Stopped));
        sleep(Duration::from_secs(15)).await;
        handle.abort();

        assert_eq!(api.calls_with_prefix("start i-1").len(), 1);
        assert_eq!(api.instance_state("i-1"), Some(InstanceState::Running));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn unresolvable_targets_are_dropped_before_the_loop_begins(api: Arc<FakeCompute>) {
        let watchdog = Watchdog::new(Arc::clone(&api));

        // No instances registered: run must return instead of looping.
        watchdog.run(&ids(&["i-ghost"])).await;

        assert_eq!(api.calls_with_prefix("get i-ghost").len(), 1);
        assert!(api.calls_with_prefix("start ").is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn check_failures_do_not_end_the_loop(api: Arc<FakeCompute>) {
        api.add_instance(descriptor("i-1", InstanceState::Running));
        let watchdog = Watchdog::new(Arc::clone(&api));

        let targets = ids(&["i-1"]);
        let handle = tokio::spawn(async move { watchdog.run(&targets).await });
        sleep(Duration::from_secs(1)).await;

        // One full in-loop check fails at the transport level (all four
        // retry attempts); the error is swallowed and the loop continues.
        for _ in 0..4 {
            api.script_failure(
                "get_instance",
                crate::api::ApiError::Timeout {
                    message: String::from("deadline"),
                },
            );
        }
        sleep(Duration::from_secs(120)).await;
        handle.abort();

        let checks = api.calls_with_prefix("get i-1").len();
        assert!(checks > 5, "loop survived the failed check, saw {checks}");
    }
}
