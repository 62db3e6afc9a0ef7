//! Attempt lifecycle hooks
//!
//! The engine reports every attempt to a [`RetryObserver`]. Hooks run inline
//! and have no say in the outcome; a panic inside one is caught and logged by
//! the engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::aferror::AfError;

/// Where the loop stands when a hook fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptInfo {
    /// 1-indexed; 0 when the loop stops before its first attempt
    pub attempt: u32,
    pub max_retries: u32,
    /// Time since the loop started
    pub elapsed: Duration,
}

/// Hooks into the retry loop
///
/// Every hook defaults to doing nothing, so implementors pick the ones they need:
///
/// ```rust
/// use actflow_core::aferror::AfError;
/// use actflow_core::retry::{AttemptInfo, RetryObserver};
/// use std::time::Duration;
///
/// struct PrintFailures;
///
/// impl RetryObserver for PrintFailures {
///     fn on_attempt_failure(&self, error: &AfError, info: AttemptInfo, next: Option<Duration>) {
///         eprintln!("attempt {} failed: {error} (next in {next:?})", info.attempt);
///     }
/// }
/// ```
pub trait RetryObserver: Send + Sync {
    fn on_attempt_start(&self, info: AttemptInfo) {
        let _ = info;
    }

    /// Every failed attempt
    ///
    /// `next_delay` is the backoff before the following attempt, or `None`
    /// when this failure ends the loop.
    fn on_attempt_failure(&self, error: &AfError, info: AttemptInfo, next_delay: Option<Duration>) {
        let _ = (error, info, next_delay);
    }

    fn on_attempt_success(&self, info: AttemptInfo) {
        let _ = info;
    }

    /// The caller's signal stopped the loop
    fn on_cancelled(&self, info: AttemptInfo) {
        let _ = info;
    }
}

/// Observer with every hook left empty
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {}

/// Emits one `tracing` event per hook, tagged with an operation name
///
/// Starts and first-try successes log at DEBUG, scheduled retries and
/// cancellations at WARN, a final failure at ERROR and a success that needed
/// retries at INFO.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new("actflow")
    }
}

impl RetryObserver for TracingObserver {
    fn on_attempt_start(&self, info: AttemptInfo) {
        tracing::debug!(
            operation = %self.operation,
            attempt = info.attempt,
            max_retries = info.max_retries,
            "retry.attempt"
        );
    }

    fn on_attempt_failure(&self, error: &AfError, info: AttemptInfo, next_delay: Option<Duration>) {
        match next_delay {
            Some(delay) => tracing::warn!(
                operation = %self.operation,
                attempt = info.attempt,
                kind = %error.kind(),
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "retry.scheduled"
            ),
            None if error.is_cancelled() => tracing::debug!(
                operation = %self.operation,
                attempt = info.attempt,
                "retry.attempt_cancelled"
            ),
            None => tracing::error!(
                operation = %self.operation,
                attempt = info.attempt,
                kind = %error.kind(),
                error = %error,
                elapsed_ms = info.elapsed.as_millis() as u64,
                "retry.gave_up"
            ),
        }
    }

    fn on_attempt_success(&self, info: AttemptInfo) {
        if info.attempt == 1 {
            tracing::debug!(operation = %self.operation, "retry.ok");
            return;
        }
        tracing::info!(
            operation = %self.operation,
            attempt = info.attempt,
            elapsed_ms = info.elapsed.as_millis() as u64,
            "retry.recovered"
        );
    }

    fn on_cancelled(&self, info: AttemptInfo) {
        tracing::warn!(
            operation = %self.operation,
            attempt = info.attempt,
            elapsed_ms = info.elapsed.as_millis() as u64,
            "retry.cancelled"
        );
    }
}

/// Counts hook invocations
#[derive(Debug, Default)]
pub struct StatsObserver {
    starts: AtomicU32,
    failures: AtomicU32,
    retries: AtomicU32,
    successes: AtomicU32,
    cancellations: AtomicU32,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Failed attempts, including the one that ended the loop
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Failed attempts that were followed by another attempt
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> u32 {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl RetryObserver for StatsObserver {
    fn on_attempt_start(&self, _info: AttemptInfo) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failure(&self, _error: &AfError, _info: AttemptInfo, next_delay: Option<Duration>) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        if next_delay.is_some() {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_attempt_success(&self, _info: AttemptInfo) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancelled(&self, _info: AttemptInfo) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}

impl<O: RetryObserver + ?Sized> RetryObserver for Arc<O> {
    fn on_attempt_start(&self, info: AttemptInfo) {
        (**self).on_attempt_start(info)
    }

    fn on_attempt_failure(&self, error: &AfError, info: AttemptInfo, next_delay: Option<Duration>) {
        (**self).on_attempt_failure(error, info, next_delay)
    }

    fn on_attempt_success(&self, info: AttemptInfo) {
        (**self).on_attempt_success(info)
    }

    fn on_cancelled(&self, info: AttemptInfo) {
        (**self).on_cancelled(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(attempt: u32) -> AttemptInfo {
        AttemptInfo {
            attempt,
            max_retries: 2,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_stats_count_failures_and_retries_separately() {
        let stats = StatsObserver::new();
        let error = AfError::network(None);

        for attempt in 1..=3 {
            stats.on_attempt_start(at(attempt));
            let next = (attempt < 3).then(|| Duration::from_millis(100));
            stats.on_attempt_failure(&error, at(attempt), next);
        }

        assert_eq!(stats.attempt_starts(), 3);
        assert_eq!(stats.failures(), 3);
        assert_eq!(stats.retries(), 2);
        assert_eq!(stats.successes(), 0);
    }

    #[test]
    fn test_shared_stats_through_arc() {
        let stats = Arc::new(StatsObserver::new());
        let hooks: Arc<dyn RetryObserver> = stats.clone();

        hooks.on_attempt_start(at(1));
        hooks.on_attempt_success(at(1));
        hooks.on_cancelled(at(0));

        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.cancellations(), 1);
    }

    #[test]
    fn test_builtin_observers_accept_every_hook() {
        let error = AfError::server(503);
        NoOpObserver.on_attempt_failure(&error, at(1), None);
        TracingObserver::default().on_attempt_failure(&error, at(1), Some(Duration::from_millis(5)));
        TracingObserver::new("load-feed").on_cancelled(at(2));
        assert_eq!(TracingObserver::new("load-feed").operation(), "load-feed");
    }
}
