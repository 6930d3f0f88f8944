//! Bounded exponential-backoff retry for transient network failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

const DEFAULT_TRIES: u32 = 4;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF: u32 = 2;

/// Classifies errors as retry-eligible transient network failures.
pub trait Transient {
    /// True when the error is a connection failure or timeout that a retry
    /// may recover from.
    fn is_transient(&self) -> bool;
}

/// Retries a fallible remote call on transient network errors with
/// exponential backoff.
///
/// Non-transient errors propagate immediately. The final permitted attempt
/// is issued without a catch, so exhausting the budget surfaces whatever
/// that attempt returns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    tries: u32,
    initial_delay: Duration,
    backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit bounds.
    #[must_use]
    pub const fn new(tries: u32, initial_delay: Duration, backoff: u32) -> Self {
        Self {
            tries,
            initial_delay,
            backoff,
        }
    }

    /// Runs `operation`, sleeping and retrying on transient failures until
    /// the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the error produced by the
    /// final attempt once the budget is exhausted.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.initial_delay;
        for _ in 1..self.tries {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(
                        delay_secs = delay.as_secs(),
                        %err,
                        "network problems, retrying after delay"
                    );
                    sleep(delay).await;
                    delay *= self.backoff;
                }
                Err(err) => return Err(err),
            }
        }
        operation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use std::cell::RefCell;
    use tokio::time::Instant;

    fn transient() -> ApiError {
        ApiError::Connect {
            message: String::from("connection refused"),
        }
    }

    /// Closure that fails `failures` times with a transient error, then
    /// succeeds, recording the paused-clock time of each attempt.
    fn flaky(
        failures: usize,
        attempts: &RefCell<Vec<Instant>>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, ApiError>> + '_ {
        move || {
            let mut log = attempts.borrow_mut();
            log.push(Instant::now());
            let result = if log.len() <= failures {
                Err(transient())
            } else {
                Ok(7)
            };
            std::future::ready(result)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_with_geometric_backoff() {
        let attempts = RefCell::new(Vec::new());
        let policy = RetryPolicy::default();

        let value = policy.execute(flaky(2, &attempts)).await.expect("recovers");
        assert_eq!(value, 7);

        let log = attempts.borrow();
        assert_eq!(log.len(), 3, "two failures plus the success");
        let first_gap = log[1] - log[0];
        let second_gap = log[2] - log[1];
        assert_eq!(first_gap, Duration::from_secs(5));
        assert_eq!(second_gap, Duration::from_secs(10));
        assert!(second_gap > first_gap, "backoff must strictly increase");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_propagates_final_error() {
        let attempts = RefCell::new(Vec::new());
        let policy = RetryPolicy::default();

        let err = policy
            .execute(flaky(10, &attempts))
            .await
            .expect_err("never recovers");
        assert!(err.is_transient());
        assert_eq!(attempts.borrow().len(), 4, "default budget is four tries");
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_propagate_without_retry() {
        let attempts = RefCell::new(Vec::new());
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let err = policy
            .execute(|| {
                attempts.borrow_mut().push(Instant::now());
                std::future::ready(Err::<u32, _>(ApiError::Rejected {
                    status: 403,
                    message: String::from("forbidden"),
                }))
            })
            .await
            .expect_err("rejection is fatal");

        assert!(matches!(err, ApiError::Rejected { status: 403, .. }));
        assert_eq!(attempts.borrow().len(), 1);
        assert_eq!(Instant::now() - started, Duration::ZERO, "no backoff sleep");
    }
}
