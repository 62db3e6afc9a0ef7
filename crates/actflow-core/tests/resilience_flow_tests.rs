//! Integration tests across the public actflow-core surface
//!
//! A retried operation runs through the in-flight registry while an
//! optimistic patch is pending, the way a client action is wired up.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use actflow_core::aferror::{classify, is_retryable, ErrorKind};
use actflow_core::backoff::{build_schedule, compute_delay, BackoffOptions, Jitter, ThreadRandom};
use actflow_core::retry::{Attempt, StatsObserver};
use actflow_core::{
    execute_with_retry, CancelToken, CommitBehavior, DedupeMode, InFlightRegistry,
    OptimisticManager, RetryOptions, RunOptions,
};
use serde_json::{json, Value};

fn no_jitter(base_ms: f64) -> BackoffOptions {
    BackoffOptions {
        base_ms,
        jitter: Jitter::None,
        ..BackoffOptions::default()
    }
}

#[test]
fn test_backoff_and_classification_scenario() {
    assert_eq!(compute_delay(3, &no_jitter(200.0), &ThreadRandom).unwrap(), 800);
    assert_eq!(
        build_schedule(5, &no_jitter(100.0), &ThreadRandom).unwrap(),
        vec![100, 200, 400, 800, 1600]
    );

    let unavailable = classify(&json!({ "status": 503 }));
    assert_eq!(unavailable.kind(), ErrorKind::Server);
    assert_eq!(unavailable.status(), Some(503));
    assert!(is_retryable(&unavailable));

    let missing = classify(&json!({ "status": 404 }));
    assert_eq!(missing.kind(), ErrorKind::Server);
    assert_eq!(missing.status(), Some(404));
    assert!(!is_retryable(&missing));
}

#[tokio::test(start_paused = true)]
async fn test_retried_operation_is_shared_by_key() {
    let registry: InFlightRegistry<String> = InFlightRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    let stats = Arc::new(StatsObserver::new());

    let start = |calls: Arc<AtomicU32>, stats: Arc<StatsObserver>| {
        registry.run(
            "post:1",
            move |signal: CancelToken| {
                let options = RetryOptions::new()
                    .with_base_ms(50.0)
                    .with_jitter(Jitter::None)
                    .with_signal(signal)
                    .with_observer(stats);
                execute_with_retry(
                    move |_: Attempt| {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        async move {
                            if n < 3 {
                                Err(json!({ "status": 503 }))
                            } else {
                                Ok::<_, Value>(format!("post after {n} calls"))
                            }
                        }
                    },
                    options,
                )
            },
            RunOptions::default(),
        )
    };

    let first = start(Arc::clone(&calls), Arc::clone(&stats));
    let second = start(Arc::clone(&calls), Arc::clone(&stats));
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), "post after 3 calls");
    assert_eq!(second.unwrap(), "post after 3 calls");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.successes(), 1);
    assert!(!registry.is_in_flight("post:1"));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_retry_loop_stops_retrying() {
    let registry: InFlightRegistry<u32> = InFlightRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));

    let failing = {
        let calls = Arc::clone(&calls);
        move |signal: CancelToken| {
            execute_with_retry(
                move |_: Attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, _>(json!({ "code": "ETIMEDOUT" })) }
                },
                RetryOptions::new()
                    .with_max_retries(10)
                    .with_base_ms(1_000.0)
                    .with_jitter(Jitter::None)
                    .with_signal(signal),
            )
        }
    };

    let stale = registry.run("search", failing, RunOptions::mode(DedupeMode::LatestWins));
    tokio::task::yield_now().await;
    let fresh = registry.run(
        "search",
        |_| async { Ok::<_, Value>(7) },
        RunOptions::mode(DedupeMode::LatestWins),
    );

    let err = stale.await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(fresh.await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_patch_rolls_back_on_failed_request() {
    #[derive(Debug, Clone, PartialEq)]
    struct Likes {
        count: u32,
    }

    let store = Arc::new(Mutex::new(Likes { count: 10 }));
    let reader = Arc::clone(&store);
    let writer = Arc::clone(&store);
    let manager = OptimisticManager::builder(
        move || reader.lock().unwrap().clone(),
        move |next| *writer.lock().unwrap() = next,
    )
    .commit_behavior(CommitBehavior::Keep)
    .build();

    let patch = manager.apply_patch(|likes: &mut Likes| likes.count += 1);
    assert_eq!(store.lock().unwrap().count, 11);

    let result = execute_with_retry(
        |_: Attempt| async { Err::<(), _>(json!({ "status": 409 })) },
        RetryOptions::new(),
    )
    .await;

    match result {
        Ok(()) => patch.commit(),
        Err(err) => {
            assert_eq!(err.kind(), ErrorKind::Conflict);
            patch.rollback();
        }
    }

    assert_eq!(store.lock().unwrap().count, 10);
    assert_eq!(manager.entry_count(), 0);
    assert!(!manager.has_baseline());
}
