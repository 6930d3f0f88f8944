//! Polls remote long-running operations to completion under a hard ceiling.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::ApiError;
use crate::model::{Operation, OperationStatus};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Terminal outcome of waiting on an operation.
///
/// `TimedOut` is a success value, not an error: the operation may still
/// finish remotely, and callers proceed optimistically to the next step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The remote side reported the operation as done.
    Completed,
    /// The hard ceiling elapsed before the operation reported done.
    TimedOut,
}

/// Polls an [`Operation`] until it completes or the ceiling elapses.
///
/// The wait suspends at every poll-interval sleep, so any number of waits
/// can interleave on one runtime; a sequential workflow simply awaits each
/// wait to completion before issuing its next step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperationWaiter {
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl Default for OperationWaiter {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl OperationWaiter {
    /// Creates a waiter with an explicit cadence and ceiling.
    #[must_use]
    pub const fn new(poll_interval: Duration, wait_timeout: Duration) -> Self {
        Self {
            poll_interval,
            wait_timeout,
        }
    }

    /// Waits for `operation`, re-fetching its completion flag via `poll`.
    ///
    /// A [`Operation::NoOp`] returns [`WaitOutcome::Completed`] immediately
    /// without polling or sleeping.
    ///
    /// # Errors
    ///
    /// Propagates any error raised by `poll`; the spent wait is abandoned.
    pub async fn wait<F, Fut>(
        &self,
        operation: &Operation,
        mut poll: F,
    ) -> Result<WaitOutcome, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OperationStatus, ApiError>>,
    {
        let Operation::Issued { id, description } = operation else {
            info!("operation was a no-op, nothing to wait for");
            return Ok(WaitOutcome::Completed);
        };

        let mut elapsed = Duration::ZERO;
        loop {
            sleep(self.poll_interval).await;
            elapsed += self.poll_interval;

            let status = poll().await?;
            if status.done {
                info!(
                    operation_id = %id,
                    description = %status.description,
                    "operation completed"
                );
                return Ok(WaitOutcome::Completed);
            }

            if elapsed >= self.wait_timeout {
                warn!(
                    operation_id = %id,
                    description = %description,
                    elapsed_secs = elapsed.as_secs(),
                    "operation running too long, proceeding without it"
                );
                return Ok(WaitOutcome::TimedOut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::RefCell;
    use tokio::time::Instant;

    fn issued(id: &str) -> Operation {
        Operation::Issued {
            id: id.to_owned(),
            description: String::from("stop instance"),
        }
    }

    /// Poll closure that reports `done` only from the `done_after`-th poll.
    fn scripted_poll(
        done_after: usize,
        polls: &RefCell<usize>,
    ) -> impl FnMut() -> std::future::Ready<Result<OperationStatus, ApiError>> + '_ {
        move || {
            let mut count = polls.borrow_mut();
            *count += 1;
            std::future::ready(Ok(OperationStatus {
                done: *count >= done_after,
                description: String::from("stop instance"),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_op_completes_without_sleeping_or_polling() {
        let waiter = OperationWaiter::default();
        let polls = RefCell::new(0);
        let started = Instant::now();

        let outcome = waiter
            .wait(&Operation::NoOp, scripted_poll(1, &polls))
            .await
            .expect("no-op never fails");

        assert_eq!(outcome, WaitOutcome::Completed);
        assert_eq!(*polls.borrow(), 0, "no poll for a no-op");
        assert_eq!(Instant::now() - started, Duration::ZERO);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    #[tokio::test(start_paused = true)]
    async fn completes_after_exactly_n_poll_intervals(#[case] done_after: usize) {
        let waiter = OperationWaiter::default();
        let polls = RefCell::new(0);
        let started = Instant::now();

        let outcome = waiter
            .wait(&issued("op-1"), scripted_poll(done_after, &polls))
            .await
            .expect("poll never errors");

        assert_eq!(outcome, WaitOutcome::Completed);
        assert_eq!(*polls.borrow(), done_after);
        let expected = Duration::from_secs(2 * done_after as u64);
        assert_eq!(Instant::now() - started, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_once_elapsed_reaches_ceiling_and_never_before() {
        let waiter = OperationWaiter::default();
        let polls = RefCell::new(0);
        let started = Instant::now();

        let outcome = waiter
            .wait(&issued("op-stuck"), scripted_poll(usize::MAX, &polls))
            .await
            .expect("poll never errors");

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(Instant::now() - started, Duration::from_secs(600));
        assert_eq!(*polls.borrow(), 300, "one poll per two-second interval");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_propagate() {
        let waiter = OperationWaiter::default();

        let result = waiter
            .wait(&issued("op-err"), || {
                std::future::ready(Err::<OperationStatus, _>(ApiError::Rejected {
                    status: 500,
                    message: String::from("boom"),
                }))
            })
            .await;

        assert!(matches!(result, Err(ApiError::Rejected { status: 500, .. })));
    }
}
