//! Cancellation-aware retry engine
//!
//! Drives repeated invocation of a fallible async operation, classifying every
//! failure through [`crate::aferror`] and spacing attempts with
//! [`crate::backoff`].
//!
//! # Features
//!
//! - Retry budget of `1 + max_retries` attempts
//! - Exponential backoff with none, full or half jitter
//! - Caller cancellation observed before, during and between attempts
//! - Pluggable predicates via the `RetryPredicate` trait
//! - Observable attempts via the `RetryObserver` trait, with a built-in
//!   `TracingObserver` for logging
//!
//! # Example
//!
//! ```rust,no_run
//! use actflow_core::cancel::CancelToken;
//! use actflow_core::retry::{execute_with_retry, RetryOptions, TracingObserver};
//!
//! async fn example(signal: CancelToken) {
//!     let options = RetryOptions::new()
//!         .with_signal(signal)
//!         .with_observer(TracingObserver::new("fetch-user"));
//!
//!     let user = execute_with_retry(
//!         |attempt| async move {
//!             // attempt.signal is cancelled together with the caller's signal
//!             Ok::<_, std::io::Error>(format!("user after {} attempt(s)", attempt.number))
//!         },
//!         options,
//!     )
//!     .await;
//! }
//! ```

mod executor;
mod observer;
mod options;
mod predicate;

pub use executor::{execute_with_retry, retry_with_policy, RetryExecutor};
pub use observer::{AttemptInfo, NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use options::{Attempt, RetryOptions};
pub use predicate::{
    AlwaysRetry, ClosurePredicate, DefaultRetryPredicate, HttpStatusPredicate, NeverRetry,
    RetryMeta, RetryPredicate,
};
