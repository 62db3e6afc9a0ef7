//! Retry predicates
//!
//! A predicate decides whether a classified failure is worth another attempt.
//! It is only consulted when attempts remain and the failure is not a
//! cancellation.

use crate::aferror::{is_retryable, AfError, ErrorKind};

/// Where the retry loop stands when a predicate is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryMeta {
    /// The attempt that just failed (1-indexed)
    pub attempt: u32,
    /// Retries allowed after the first attempt
    pub max_retries: u32,
}

/// A predicate that determines whether a failure should be retried
///
/// # Example
///
/// ```rust
/// use actflow_core::aferror::{AfError, ErrorKind};
/// use actflow_core::retry::{RetryMeta, RetryPredicate};
///
/// /// Retry conflicts a couple of times, nothing else
/// struct ConflictRetry;
///
/// impl RetryPredicate for ConflictRetry {
///     fn should_retry(&self, error: &AfError, meta: RetryMeta) -> bool {
///         error.kind() == ErrorKind::Conflict && meta.attempt < 3
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, error: &AfError, meta: RetryMeta) -> bool;
}

/// Retries whatever [`is_retryable`] approves
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPredicate;

impl RetryPredicate for DefaultRetryPredicate {
    fn should_retry(&self, error: &AfError, _meta: RetryMeta) -> bool {
        is_retryable(error)
    }
}

/// A predicate that always returns true (all errors are retryable)
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl RetryPredicate for AlwaysRetry {
    fn should_retry(&self, _error: &AfError, _meta: RetryMeta) -> bool {
        true
    }
}

/// A predicate that never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryPredicate for NeverRetry {
    fn should_retry(&self, _error: &AfError, _meta: RetryMeta) -> bool {
        false
    }
}

/// A predicate that uses a closure to determine retryability
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> RetryPredicate for ClosurePredicate<F>
where
    F: Fn(&AfError, RetryMeta) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &AfError, meta: RetryMeta) -> bool {
        (self.predicate)(error, meta)
    }
}

/// A predicate over server statuses
///
/// Failures without a status (network, auth, ...) fall back to
/// [`is_retryable`].
#[derive(Debug, Clone)]
pub struct HttpStatusPredicate {
    retryable_codes: Vec<u16>,
}

impl HttpStatusPredicate {
    /// Default retryable codes: 408, 425, 429, 500, 502, 503, 504
    pub fn default_http() -> Self {
        Self {
            retryable_codes: vec![408, 425, 429, 500, 502, 503, 504],
        }
    }

    pub fn with_codes(codes: Vec<u16>) -> Self {
        Self {
            retryable_codes: codes,
        }
    }

    pub fn is_retryable_code(&self, code: u16) -> bool {
        self.retryable_codes.contains(&code)
    }
}

impl RetryPredicate for HttpStatusPredicate {
    fn should_retry(&self, error: &AfError, _meta: RetryMeta) -> bool {
        match (error.kind(), error.status()) {
            (ErrorKind::Server, Some(code)) => self.is_retryable_code(code),
            _ => is_retryable(error),
        }
    }
}

impl<T: RetryPredicate + ?Sized> RetryPredicate for std::sync::Arc<T> {
    fn should_retry(&self, error: &AfError, meta: RetryMeta) -> bool {
        (**self).should_retry(error, meta)
    }
}
