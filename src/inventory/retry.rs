//! Call gate: bounded concurrency, retry with backoff, cancellation
//!
//! Every provider call made by the engine goes through a [`CallGate`]. The
//! gate holds a semaphore permit for the duration of one attempt, retries
//! failures classified as transient with exponential backoff and full
//! jitter, and refuses to start new calls once the scan is cancelled.

use super::classify::classify;
use super::error::Cancelled;
use super::model::FailureKind;
use anyhow::{Context, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Backoff policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `attempt + 1`
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Full jitter: uniform between zero and the ceiling
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Shared gate in front of every provider call
#[derive(Clone)]
pub struct CallGate {
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl CallGate {
    pub fn new(max_concurrency: usize, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            retry,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `op` under a permit, retrying transient failures
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .context("provider call gate closed")?;
                op().await
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts || classify(&err) != FailureKind::Transient {
                return Err(err);
            }

            let delay = self.retry.backoff(attempt - 1);
            tracing::warn!(
                "{} failed (attempt {}/{}): {:#} - retrying in {}ms",
                what,
                attempt,
                self.retry.max_attempts,
                err,
                delay.as_millis()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::error::ApiError;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_backoff_ceiling_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(250));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_ceiling(20), Duration::from_secs(8));
        assert!(policy.backoff(3) <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let gate = CallGate::new(2, fast_policy(), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let result = gate
            .call("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::new("test", 429, "TooManyRequests", "slow down").into())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let gate = CallGate::new(2, fast_policy(), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let result: Result<()> = gate
            .call("denied", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new("test", 403, "AccessDenied", "no").into())
            })
            .await;

        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_give_up_after_max_attempts() {
        let gate = CallGate::new(2, fast_policy(), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let result: Result<()> = gate
            .call("throttled", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new("test", 503, "Unavailable", "down").into())
            })
            .await;

        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_in_flight_calls_are_bounded() {
        let gate = CallGate::new(2, fast_policy(), CancellationToken::new());
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let calls = (0..8).map(|_| {
            gate.call("bounded", || async {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });
        for result in futures::future::join_all(calls).await {
            assert_ok!(result);
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_gate_issues_no_calls() {
        let cancel = CancellationToken::new();
        let gate = CallGate::new(2, fast_policy(), cancel.clone());
        cancel.cancel();

        let calls = AtomicU32::new(0);
        let result: Result<()> = gate
            .call("never", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(classify(&result.unwrap_err()), FailureKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
