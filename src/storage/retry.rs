//! Bounded retry with exponential backoff and jitter.
//!
//! The policy is a plain value parameterized by attempt budget, base delay,
//! multiplier and jitter fraction, so it can be exercised in tests with a
//! paused clock and a scripted failing operation. Classification lives in
//! `StorageError`: transient failures consume retry budget, permanent ones
//! abort on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

use crate::storage::StorageError;

/// Retry schedule applied independently to each storage operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first call
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Delay growth factor between retries
    pub multiplier: u32,

    /// Random extra sleep, as a fraction of the current delay, to avoid
    /// synchronized retry storms against the provider
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            jitter_fraction: 0.25,
        }
    }
}

/// Terminal failure of a retried operation: the last underlying cause
/// tagged with the operation name and the number of calls made.
#[derive(Debug, Error)]
#[error("{operation} gave up after {attempts} attempt(s): {source}")]
pub struct RetryError {
    pub operation: &'static str,
    pub attempts: u32,
    #[source]
    pub source: StorageError,
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or the budget is
    /// spent. Returns the value together with the number of calls made.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> Result<(T, u32), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut delay = self.base_delay;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok((value, attempts)),
                Err(e) if e.is_transient() && attempts <= self.max_retries => {
                    let backoff = self.jittered(delay);
                    warn!(
                        operation,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    delay = delay.saturating_mul(self.multiplier);
                }
                Err(source) => {
                    return Err(RetryError {
                        operation,
                        attempts,
                        source,
                    })
                }
            }
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.jitter_fraction);
        delay + Duration::from_secs_f64(delay.as_secs_f64() * fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_fraction: 0.0,
            ..Default::default()
        }
    }

    /// Operation that fails `failures` times, then succeeds.
    fn flaky(failures: u32) -> impl FnMut() -> std::future::Ready<Result<&'static str, StorageError>>
    {
        let calls = Cell::new(0u32);
        move || {
            let call = calls.get() + 1;
            calls.set(call);
            if call <= failures {
                std::future::ready(Err(StorageError::transient("throttled")))
            } else {
                std::future::ready(Ok("done"))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let (value, attempts) = no_jitter().run("op", flaky(0)).await.unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let (value, attempts) = no_jitter().run("op", flaky(3)).await.unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_aborts_immediately() {
        let result: Result<((), u32), _> = no_jitter()
            .run("op", || {
                std::future::ready(Err(StorageError::permanent("access denied")))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.source.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_reports_last_cause() {
        let result = no_jitter().run("upload archive", flaky(10)).await;

        let err = result.unwrap_err();
        assert_eq!(err.operation, "upload archive");
        assert_eq!(err.attempts, 4);
        assert!(err.source.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_from_one_second() {
        let start = tokio::time::Instant::now();
        let (_, attempts) = no_jitter().run("op", flaky(3)).await.unwrap();

        assert_eq!(attempts, 4);
        // 1s + 2s + 4s of enforced sleep
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_within_fraction() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::default();
        let (_, attempts) = policy.run("op", flaky(2)).await.unwrap();

        assert_eq!(attempts, 3);
        let elapsed = start.elapsed();
        // 1s + 2s minimum, plus at most 25% of each interval
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed <= Duration::from_secs_f64(3.75));
    }
}
