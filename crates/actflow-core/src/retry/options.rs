//! Per-call retry configuration

use std::fmt;
use std::sync::Arc;

use crate::aferror::AfError;
use crate::backoff::{BackoffOptions, Jitter, RandomSource, ThreadRandom};
use crate::cancel::CancelToken;
use crate::config::RetryPolicy;

use super::observer::{NoOpObserver, RetryObserver};
use super::predicate::{ClosurePredicate, DefaultRetryPredicate, RetryMeta, RetryPredicate};

/// What an operation receives on each attempt
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-indexed attempt number
    pub number: u32,
    /// Cancelled when the caller's signal is cancelled
    pub signal: CancelToken,
}

/// Configuration for [`execute_with_retry`](super::execute_with_retry)
///
/// Defaults: 3 retries, 200ms base, factor 2, 30s cap, full jitter, no
/// signal, [`DefaultRetryPredicate`], [`NoOpObserver`], [`ThreadRandom`].
///
/// # Example
///
/// ```rust
/// use actflow_core::backoff::Jitter;
/// use actflow_core::retry::{RetryOptions, TracingObserver};
///
/// let options = RetryOptions::new()
///     .with_max_retries(5)
///     .with_base_ms(50.0)
///     .with_jitter(Jitter::Half)
///     .with_observer(TracingObserver::new("sync-profile"));
/// assert_eq!(options.max_retries, 5);
/// ```
#[derive(Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub backoff: BackoffOptions,
    pub signal: Option<CancelToken>,
    pub(crate) predicate: Arc<dyn RetryPredicate>,
    pub(crate) observer: Arc<dyn RetryObserver>,
    pub(crate) random: Arc<dyn RandomSource>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffOptions::default(),
            signal: None,
            predicate: Arc::new(DefaultRetryPredicate),
            observer: Arc::new(NoOpObserver),
            random: Arc::new(ThreadRandom),
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("signal", &self.signal.as_ref().map(CancelToken::is_cancelled))
            .finish_non_exhaustive()
    }
}

impl From<&RetryPolicy> for RetryOptions {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            backoff: policy.backoff,
            ..Self::default()
        }
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffOptions) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_base_ms(mut self, base_ms: f64) -> Self {
        self.backoff.base_ms = base_ms;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.backoff.factor = factor;
        self
    }

    pub fn with_max_ms(mut self, max_ms: f64) -> Self {
        self.backoff.max_ms = max_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    /// Caller cancellation; each attempt gets a child of this token
    pub fn with_signal(mut self, signal: CancelToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Shorthand for a [`ClosurePredicate`]
    pub fn with_should_retry<F>(self, f: F) -> Self
    where
        F: Fn(&AfError, RetryMeta) -> bool + Send + Sync + 'static,
    {
        self.with_predicate(ClosurePredicate::new(f))
    }

    pub fn with_observer(mut self, observer: impl RetryObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Arc::new(random);
        self
    }

    /// `1 + max_retries`, saturating
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
