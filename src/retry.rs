//! Bounded retry with exponential backoff and jitter.
//!
//! Every sub-store method wraps its backend round-trip in [`with_retry`]:
//! a visible loop over an attempt closure, driven by the pure
//! transient/permanent classification on [`StorageError`]. No macros, no
//! annotations; the policy and the observer travel explicitly.
//!
//! Cancellation: dropping the returned future between attempts (or during a
//! backoff sleep) aborts immediately; acquired sessions are released by their
//! own drop guards.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::RngExt;
use tokio::time::Instant;

use crate::errors::{FailureClass, Result};

/// Retry policy applied to a single storage operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Uniform jitter in `[-jitter, +jitter]` added to each backoff.
    pub jitter: Duration,
    /// Hard cap on attempt time plus backoff sleeps.
    pub max_duration: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            jitter: Duration::from_millis(100),
            max_duration: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries; useful for tests and one-shot tools.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff for the given failed attempt (1-based): `base * 2^(attempt-1)`,
    /// jittered, floored at zero.
    fn backoff(&self, failed_attempt: u32) -> Duration {
        let base = self
            .base_delay
            .saturating_mul(1u32 << (failed_attempt - 1).min(16));
        let jitter_ms = self.jitter.as_millis() as i64;
        if jitter_ms == 0 {
            return base;
        }
        let offset = rand::rng().random_range(-jitter_ms..=jitter_ms);
        let base_ms = base.as_millis() as i64;
        Duration::from_millis((base_ms + offset).max(0) as u64)
    }
}

/// One observed retry decision: `operation` failed on `attempt` with an error
/// of `error_kind`, and will be retried after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub operation: &'static str,
    pub attempt: u32,
    pub delay: Duration,
    pub error_kind: &'static str,
}

/// Receives structured retry events. Implementations must be cheap; they run
/// on the operation's own task.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, event: &RetryEvent);
}

/// Default observer: emits a `tracing` warning per retried attempt.
#[derive(Debug, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, event: &RetryEvent) {
        tracing::warn!(
            operation = event.operation,
            attempt = event.attempt,
            delay_ms = event.delay.as_millis() as u64,
            error_kind = event.error_kind,
            "retrying transient storage failure"
        );
    }
}

/// Buffering observer for diagnostics and tests.
#[derive(Debug, Default)]
pub struct MemoryRetryObserver {
    events: Mutex<Vec<RetryEvent>>,
}

impl MemoryRetryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl RetryObserver for MemoryRetryObserver {
    fn on_retry(&self, event: &RetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Run `attempt_fn` under the retry policy.
///
/// Permanent failures return immediately. Transient failures are retried up
/// to `max_retries` times with exponential, jittered backoff, as long as the
/// total elapsed time stays under `max_duration`. Each retried attempt is
/// reported to `observer` before the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    observer: &dyn RetryObserver,
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = policy.enabled
                    && err.class() == FailureClass::Transient
                    && attempt <= policy.max_retries;
                if !retryable {
                    return Err(err);
                }
                let delay = policy.backoff(attempt);
                if started.elapsed() + delay > policy.max_duration {
                    return Err(err);
                }
                observer.on_retry(&RetryEvent {
                    operation,
                    attempt,
                    delay,
                    error_kind: err.kind_label(),
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::errors::StorageError;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
            max_duration: Duration::from_secs(5),
        }
    }

    fn transient() -> StorageError {
        StorageError::Transient {
            operation: "test".into(),
            message: "connection reset".into(),
        }
    }

    #[tokio::test]
    async fn permanent_errors_fail_on_first_attempt() {
        let observer = MemoryRetryObserver::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), &observer, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::invalid_argument("bad input")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn transient_error_recovers_on_second_attempt() {
        let observer = MemoryRetryObserver::new();
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), &observer, "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 { Err(transient()) } else { Ok(n) }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 1);
        let events = observer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attempt, 1);
        assert_eq!(events[0].error_kind, "transient");
    }

    #[tokio::test]
    async fn exhausts_after_max_retries_plus_one_attempts() {
        let observer = MemoryRetryObserver::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), &observer, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(observer.events().len(), 3);
    }

    #[tokio::test]
    async fn disabled_policy_never_retries() {
        let observer = MemoryRetryObserver::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::disabled(), &observer, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            jitter: Duration::from_millis(100),
            max_duration: Duration::from_secs(30),
        };
        for attempt in 1..=4u32 {
            let base = 200u64 << (attempt - 1);
            let delay = policy.backoff(attempt).as_millis() as u64;
            assert!(delay >= base - 100, "attempt {attempt}: {delay} < {}", base - 100);
            assert!(delay <= base + 100, "attempt {attempt}: {delay} > {}", base + 100);
        }
    }
}
