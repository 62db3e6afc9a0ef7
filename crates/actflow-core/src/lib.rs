//! # actflow-core
//!
//! Resilience primitives for request-like async operations:
//! - Closed error taxonomy with total classification of arbitrary failures
//! - Exponential backoff with jitter and an injectable randomness source
//! - Cancellation-aware retry engine
//! - Per-key in-flight dedupe, supersession and pass-through
//! - Optimistic patch log with commit, rollback and compaction
//! - Layered configuration (embedded defaults, `actflow.yaml`, `ACTFLOW_*`)

pub mod aferror;
pub mod backoff;
pub mod cancel;
pub mod config;
pub mod error;
pub mod inflight;
pub mod optimistic;
pub mod retry;

pub use aferror::{AfError, AfErrorException, ErrorKind, FailureView};
pub use cancel::CancelToken;
pub use config::{ConfigLoader, ResilienceConfig};
pub use error::{Error, InvalidArgumentCode, Result};
pub use inflight::{DedupeMode, InFlightRegistry, RunOptions};
pub use optimistic::{CommitBehavior, OptimisticManager, PatchHandle};
pub use retry::{execute_with_retry, RetryExecutor, RetryOptions};
