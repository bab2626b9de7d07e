//! Exponential backoff gate wrapped around every list-style provider call.
//!
//! A `RetryPolicy` holds mutable per-call-site state and must not be shared
//! across concurrent call sites. Callers reuse one policy for a sequence of
//! related calls (all pages of one listing, all plan-type queries of one
//! Savings Plans sweep) and construct a fresh one per task.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default base delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default cap on a single backoff sleep
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default bound on consecutive retries
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Per-call-site retry state with exponential backoff and jitter
#[derive(Debug)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
            attempts: 0,
        }
    }

    /// Current consecutive failure count
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the failure counter after a successful call
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    /// Record a failed call. Returns true while another retry is allowed.
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts <= self.max_retries
    }

    /// Backoff delay for the current attempt: min(max, base * 2^(n-1)) with
    /// uniform jitter up to 20% in a random direction. Attempt zero sleeps
    /// nothing.
    fn backoff_delay(&self) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = self.attempts.saturating_sub(1).min(31);
        let unclamped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        let delay = unclamped.min(self.max_delay);

        let jittered = {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let magnitude = delay.as_secs_f64() * rng.gen_range(0.0..=0.2);
            if rng.gen_bool(0.5) {
                delay.as_secs_f64() + magnitude
            } else {
                (delay.as_secs_f64() - magnitude).max(0.0)
            }
        };
        Duration::from_secs_f64(jittered)
    }

    /// Sleep the backoff for the current attempt, returning immediately with
    /// a cancellation error if the token fires mid-sleep. The failure counter
    /// is left untouched on cancellation.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        let delay = self.backoff_delay();
        if delay.is_zero() {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("operation cancelled"));
            }
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled("operation cancelled during backoff")),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Run an operation through the backoff gate. Retryable errors are
    /// retried up to the bound; the last error is surfaced once the bound is
    /// exhausted. Non-retryable errors surface immediately.
    pub async fn run<T, F, Fut>(&mut self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            self.wait(cancel).await?;
            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    if !self.record_failure() {
                        return Err(err);
                    }
                    log::warn!(
                        "retryable {} error, attempt {}/{}: {}",
                        err.category(),
                        self.attempts,
                        self.max_retries,
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(8), 5)
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let mut policy = RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            DEFAULT_MAX_RETRIES,
        );
        // Jitter is at most 20%, so the delay stays within these envelopes.
        for (failures, expected_secs) in [(1u32, 1.0f64), (2, 2.0), (3, 4.0), (6, 30.0)] {
            policy.attempts = failures;
            let delay = policy.backoff_delay().as_secs_f64();
            assert!(
                delay >= expected_secs * 0.8 && delay <= expected_secs.min(30.0) * 1.2,
                "attempt {} gave {}s",
                failures,
                delay
            );
        }
    }

    #[test]
    fn test_counter_reset_on_success() {
        let mut policy = fast_policy();
        assert!(policy.record_failure());
        assert!(policy.record_failure());
        assert_eq!(policy.attempts(), 2);
        policy.record_success();
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_retries_exhaust() {
        let mut policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1), 2);
        assert!(policy.record_failure());
        assert!(policy.record_failure());
        assert!(!policy.record_failure());
    }

    #[tokio::test]
    async fn test_run_retries_then_succeeds() {
        let mut policy = fast_policy();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = policy
            .run(&cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::api("transient"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(policy.attempts(), 0);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_fatal_errors() {
        let mut policy = fast_policy();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::validation("bad input")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_surfaces_last_error_after_bound() {
        let mut policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 2);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::rate_limit("throttled")) }
            })
            .await;

        assert!(matches!(result, Err(Error::RateLimit(_))));
        // Initial attempt plus max_retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let mut policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(30), 5);
        policy.attempts = 3;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = std::time::Instant::now();
        let result = policy.wait(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        // Cancellation does not touch the failure counter.
        assert_eq!(policy.attempts(), 3);
    }
}
