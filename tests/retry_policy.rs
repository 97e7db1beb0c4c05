//! End-to-end retry behavior: a simulated connection reset on the first
//! attempt recovers on the second, with the backoff actually slept and the
//! attempt observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use ragweave::errors::StorageError;
use ragweave::retry::{MemoryRetryObserver, RetryPolicy, with_retry};

fn scenario_policy() -> RetryPolicy {
    RetryPolicy {
        enabled: true,
        max_retries: 3,
        base_delay: Duration::from_millis(200),
        jitter: Duration::from_millis(100),
        max_duration: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn transient_reset_recovers_on_second_attempt() {
    let observer = MemoryRetryObserver::new();
    let attempts = AtomicU32::new(0);
    let started = Instant::now();

    let value = with_retry(&scenario_policy(), &observer, "vectors.upsert", || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err(StorageError::Transient {
                    operation: "vectors.upsert".into(),
                    message: "connection reset".into(),
                })
            } else {
                Ok("stored")
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(value, "stored");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    // first backoff is 200ms +/- 100ms jitter
    assert!(started.elapsed() >= Duration::from_millis(100));

    let events = observer.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, "vectors.upsert");
    assert_eq!(events[0].attempt, 1);
    assert_eq!(events[0].error_kind, "transient");
    assert!(events[0].delay >= Duration::from_millis(100));
    assert!(events[0].delay <= Duration::from_millis(300));
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let observer = MemoryRetryObserver::new();
    let attempts = AtomicU32::new(0);

    let result: Result<(), _> = with_retry(&scenario_policy(), &observer, "graph.upsert", || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async {
            Err(StorageError::ConstraintViolation {
                message: "unique violation".into(),
            })
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(observer.events().is_empty());
}

#[tokio::test]
async fn exhaustion_runs_exactly_max_retries_plus_one() {
    let observer = MemoryRetryObserver::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(1),
        jitter: Duration::ZERO,
        ..scenario_policy()
    };

    let result: Result<(), _> = with_retry(&policy, &observer, "kv.set", || {
        attempts.fetch_add(1, Ordering::SeqCst);
        async {
            Err(StorageError::Transient {
                operation: "kv.set".into(),
                message: "deadlock detected".into(),
            })
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    let attempts_seen: Vec<u32> = observer.events().iter().map(|e| e.attempt).collect();
    assert_eq!(attempts_seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn database_locked_counts_as_transient() {
    let observer = MemoryRetryObserver::new();
    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(1),
        jitter: Duration::ZERO,
        ..scenario_policy()
    };

    let value = with_retry(&policy, &observer, "vectors.delete", || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(StorageError::DatabaseLocked {
                    operation: "vectors.delete".into(),
                    waited_ms: 30_000,
                })
            } else {
                Ok(n)
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(value, 2);
    let events = observer.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.error_kind == "database_locked"));
}
