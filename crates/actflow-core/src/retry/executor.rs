//! Retry execution engine
//!
//! This module provides the cancellation-aware retry loop. Every failure is
//! classified into an [`AfError`] before any decision is taken, and the error
//! returned to the caller is always an [`AfErrorException`] carrying the real
//! classified failure.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::time::Instant;

use crate::aferror::{classify, wrap, AfError, AfErrorException, FailureView};
use crate::backoff::compute_delay;
use crate::cancel::CancelToken;
use crate::config::RetryPolicy;

use super::observer::AttemptInfo;
use super::options::{Attempt, RetryOptions};
use super::predicate::RetryMeta;

/// Run `op` until it succeeds, fails for good or is cancelled
///
/// # Arguments
///
/// * `op` - Called once per attempt with the attempt number and a child of
///   the caller's signal
/// * `options` - Retry budget, backoff, signal, predicate and observer
///
/// # Example
///
/// ```rust,no_run
/// use actflow_core::retry::{execute_with_retry, RetryOptions};
/// use serde_json::json;
///
/// async fn example() {
///     let result = execute_with_retry(
///         |attempt| async move {
///             if attempt.number < 3 {
///                 Err(json!({ "status": 503 }))
///             } else {
///                 Ok("done")
///             }
///         },
///         RetryOptions::new(),
///     )
///     .await;
///     assert_eq!(result.unwrap(), "done");
/// }
/// ```
pub async fn execute_with_retry<F, Fut, T, E>(
    op: F,
    options: RetryOptions,
) -> Result<T, AfErrorException>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureView,
{
    RetryExecutor::new(options).execute(op).await
}

/// Execute an operation with retry settings from a configured policy
///
/// Uses the default predicate and no signal.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    op: F,
) -> Result<T, AfErrorException>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureView,
{
    RetryExecutor::new(RetryOptions::from(policy))
        .execute(op)
        .await
}

/// A reusable retry executor
///
/// Holds a [`RetryOptions`] and runs any number of operations with it. The
/// signal in the options applies to every execution unless overridden with
/// [`execute_with_signal`](Self::execute_with_signal).
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    options: RetryOptions,
}

impl From<RetryOptions> for RetryExecutor {
    fn from(options: RetryOptions) -> Self {
        Self::new(options)
    }
}

impl RetryExecutor {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, AfErrorException>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureView,
    {
        let signal = self.options.signal.clone().unwrap_or_default();
        self.run(op, signal).await
    }

    /// Execute an operation, observing `signal` instead of the configured one
    pub async fn execute_with_signal<F, Fut, T, E>(
        &self,
        op: F,
        signal: CancelToken,
    ) -> Result<T, AfErrorException>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureView,
    {
        self.run(op, signal).await
    }

    async fn run<F, Fut, T, E>(&self, mut op: F, signal: CancelToken) -> Result<T, AfErrorException>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureView,
    {
        let options = &self.options;
        let observer = &options.observer;
        let started = Instant::now();
        let info = |attempt: u32| AttemptInfo {
            attempt,
            max_retries: options.max_retries,
            elapsed: started.elapsed(),
        };

        if let Err(err) = options.backoff.validate() {
            return Err(wrap(&err));
        }

        if signal.is_cancelled() {
            notify("on_cancelled", || observer.on_cancelled(info(0)));
            return Err(signal.to_exception());
        }

        let max_attempts = options.max_attempts();

        for attempt in 1..=max_attempts {
            notify("on_attempt_start", || observer.on_attempt_start(info(attempt)));

            let outcome = op(Attempt {
                number: attempt,
                signal: signal.child(),
            })
            .await;

            let af = match outcome {
                Ok(value) => {
                    notify("on_attempt_success", || {
                        observer.on_attempt_success(info(attempt))
                    });
                    return Ok(value);
                }
                Err(raw) => classify(&raw),
            };

            // A failure while the caller is cancelled is a cancellation,
            // whatever the operation reported
            if af.is_cancelled() || signal.is_cancelled() {
                let af = if signal.is_cancelled() && !af.is_cancelled() {
                    signal.to_exception().into_af()
                } else {
                    af
                };
                notify("on_attempt_failure", || {
                    observer.on_attempt_failure(&af, info(attempt), None)
                });
                if signal.is_cancelled() {
                    notify("on_cancelled", || observer.on_cancelled(info(attempt)));
                }
                return Err(AfErrorException::new(af));
            }

            let meta = RetryMeta {
                attempt,
                max_retries: options.max_retries,
            };
            if attempt >= max_attempts || !options.predicate.should_retry(&af, meta) {
                notify("on_attempt_failure", || {
                    observer.on_attempt_failure(&af, info(attempt), None)
                });
                return Err(AfErrorException::new(af));
            }

            let delay = compute_delay(attempt, &options.backoff, options.random.as_ref())
                .map_err(|err| wrap(&err))?;
            let delay = Duration::from_millis(delay);

            notify("on_attempt_failure", || {
                observer.on_attempt_failure(&af, info(attempt), Some(delay))
            });

            tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    notify("on_cancelled", || observer.on_cancelled(info(attempt)));
                    return Err(signal.to_exception());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // Unreachable: the last attempt always returns above
        Err(AfErrorException::new(
            AfError::internal().with_code("RETRY_EXHAUSTED"),
        ))
    }
}

/// Run an observer callback, containing any panic
fn notify(hook: &'static str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(hook = hook, panic = %message, "retry observer panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::observer::StatsObserver;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success() {
        let observer = Arc::new(StatsObserver::new());

        let result = execute_with_retry(
            |_| async { Ok::<_, serde_json::Value>("success") },
            RetryOptions::new().with_observer(observer.clone()),
        )
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(observer.attempt_starts(), 1);
        assert_eq!(observer.successes(), 1);
        assert_eq!(observer.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_without_retries() {
        let observer = Arc::new(StatsObserver::new());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), _> = execute_with_retry(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(json!({ "status": 503 })) }
            },
            RetryOptions::new()
                .with_max_retries(0)
                .with_observer(observer.clone()),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.af().status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.failures(), 1);
        assert_eq!(observer.retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_backoff_rejected_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), _> = execute_with_retry(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, serde_json::Value>(()) }
            },
            RetryOptions::new().with_base_ms(0.0),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.af().code(), Some("BACKOFF_INVALID_BASE"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notify_contains_panics() {
        notify("on_attempt_success", || panic!("observer bug"));
    }
}
