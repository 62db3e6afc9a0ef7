//! Per-key in-flight execution registry
//!
//! [`InFlightRegistry::run`] tracks at most one live execution per string key
//! and decides, per [`DedupeMode`], whether a new caller joins it, supersedes
//! it or bypasses it. Each execution runs as its own tokio task, so it settles
//! even when every caller stops waiting, and its entry is removed exactly when
//! it settles.
//!
//! # Example
//!
//! ```rust,no_run
//! use actflow_core::inflight::{InFlightRegistry, RunOptions};
//!
//! async fn example(registry: InFlightRegistry<String>) {
//!     // Concurrent callers for the same key share one execution
//!     let a = registry.run("user:42", |_signal| async { Ok::<_, std::io::Error>("ada".to_string()) }, RunOptions::default());
//!     let b = registry.run("user:42", |_signal| async { Ok::<_, std::io::Error>("ada".to_string()) }, RunOptions::default());
//!     let (a, b) = tokio::join!(a, b);
//!     assert_eq!(a.unwrap(), b.unwrap());
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::aferror::{wrap, AfError, AfErrorException, FailureView};
use crate::cancel::CancelToken;

/// Reason given to an execution evicted by a newer `LatestWins` call
pub const SUPERSEDED: &str = "superseded";

/// How a call treats an execution already running under its key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupeMode {
    /// Join the running execution
    #[default]
    #[serde(alias = "byKey")]
    ByKey,
    /// Cancel the running execution and start a new one
    #[serde(alias = "latestWins")]
    LatestWins,
    /// Always start an independent execution
    None,
}

impl std::str::FromStr for DedupeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by-key" | "byKey" => Ok(Self::ByKey),
            "latest-wins" | "latestWins" => Ok(Self::LatestWins),
            "none" => Ok(Self::None),
            other => Err(format!("unknown dedupe mode '{other}'")),
        }
    }
}

/// Per-call options for [`InFlightRegistry::run`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Falls back to the registry's default mode
    pub mode: Option<DedupeMode>,
    /// The caller's cancellation
    ///
    /// When this call starts an execution, cancelling it cancels the
    /// execution for every waiter. When this call joins, cancelling it only
    /// abandons this caller's wait.
    pub signal: Option<CancelToken>,
}

impl RunOptions {
    pub fn mode(mode: DedupeMode) -> Self {
        Self {
            mode: Some(mode),
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: CancelToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, AfErrorException>>>;

struct Entry<T> {
    id: u64,
    token: CancelToken,
    result: SharedResult<T>,
}

type EntryMap<T> = Arc<Mutex<HashMap<String, Entry<T>>>>;

/// Registry of live executions keyed by string identity
///
/// Cloning is cheap and clones share the same map.
pub struct InFlightRegistry<T> {
    entries: EntryMap<T>,
    next_id: Arc<AtomicU64>,
    default_mode: DedupeMode,
}

impl<T> Clone for InFlightRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            next_id: Arc::clone(&self.next_id),
            default_mode: self.default_mode,
        }
    }
}

impl<T> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InFlightRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("size", &self.size())
            .field("default_mode", &self.default_mode)
            .finish()
    }
}

fn lock<T>(entries: &Mutex<HashMap<String, Entry<T>>>) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> InFlightRegistry<T> {
    pub fn new() -> Self {
        Self::with_default_mode(DedupeMode::ByKey)
    }

    /// Registry whose calls use `mode` unless they name one
    pub fn with_default_mode(mode: DedupeMode) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            default_mode: mode,
        }
    }

    pub fn default_mode(&self) -> DedupeMode {
        self.default_mode
    }

    /// Whether an execution is registered under `key`
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    /// Number of registered executions
    pub fn size(&self) -> usize {
        lock(&self.entries).len()
    }
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run `op` under `key`, or join the execution already running there
    ///
    /// Registration happens when this is called, not when the returned future
    /// is first polled. `op` is only invoked when a new execution starts and
    /// receives that execution's cancellation token, with the registry
    /// unlocked. Every failure, including a panic in the future `op` returns,
    /// is reported as an [`AfErrorException`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime when a new execution has to be
    /// spawned, and propagates a panic raised by `op` itself. The key is freed
    /// in both cases.
    pub fn run<F, Fut, E>(
        &self,
        key: impl Into<String>,
        op: F,
        options: RunOptions,
    ) -> impl Future<Output = Result<T, AfErrorException>> + Send + 'static
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: FailureView + Send + 'static,
    {
        let key = key.into();
        let mode = options.mode.unwrap_or(self.default_mode);
        let signal = options.signal;

        let (result, start) = {
            let mut entries = lock(&self.entries);

            match (mode, entries.get(&key)) {
                (DedupeMode::ByKey, Some(existing)) => {
                    tracing::trace!(key = %key, id = existing.id, "inflight.join");
                    (existing.result.clone(), None)
                }
                (mode, existing) => {
                    if let (DedupeMode::LatestWins, Some(existing)) = (mode, existing) {
                        tracing::debug!(key = %key, id = existing.id, "inflight.supersede");
                        existing.token.cancel_with(SUPERSEDED);
                        entries.remove(&key);
                    }
                    let register = !(mode == DedupeMode::None && entries.contains_key(&key));

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let token = signal.as_ref().map(CancelToken::child).unwrap_or_default();
                    let (tx, rx) = oneshot::channel::<Result<T, AfErrorException>>();
                    let result = rx
                        .map(|received| received.unwrap_or_else(|_| Err(dropped())))
                        .boxed()
                        .shared();

                    if register {
                        entries.insert(
                            key.clone(),
                            Entry {
                                id,
                                token: token.clone(),
                                result: result.clone(),
                            },
                        );
                    }
                    tracing::trace!(key = %key, id, mode = ?mode, registered = register, "inflight.start");
                    (result, Some((id, token, tx)))
                }
            }
        };

        // `op` runs with the map unlocked so it may call back into the registry
        if let Some((id, token, tx)) = start {
            let registration = Registration {
                entries: Arc::clone(&self.entries),
                key,
                id,
            };
            let fut = op(token.clone());
            tokio::spawn(execute(registration, token, fut, tx));
        }

        async move {
            match signal {
                Some(signal) => tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(signal.to_exception()),
                    outcome = result => outcome,
                },
                None => result.await,
            }
        }
    }
}

/// Removes its entry when dropped, if the entry is still its own
///
/// Dropped on every exit path of an execution, including a panic in `op`
/// before the task was spawned.
struct Registration<T> {
    entries: EntryMap<T>,
    key: String,
    id: u64,
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        let mut map = lock(&self.entries);
        if map.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            map.remove(&self.key);
        }
    }
}

/// Body of an execution task
async fn execute<T, Fut, E>(
    registration: Registration<T>,
    token: CancelToken,
    fut: Fut,
    tx: oneshot::Sender<Result<T, AfErrorException>>,
) where
    Fut: Future<Output = Result<T, E>> + Send,
    E: FailureView + Send,
{
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(token.to_exception()),
        caught = AssertUnwindSafe(fut).catch_unwind() => match caught {
            Ok(outcome) => outcome.map_err(|e| wrap(&e)),
            Err(panic) => Err(AfErrorException::new(
                AfError::internal().with_cause(panic_message(&*panic)),
            )),
        },
    };

    let (key, id) = (&registration.key, registration.id);
    match &outcome {
        Ok(_) => tracing::trace!(key = %key, id, "inflight.settle"),
        Err(err) => tracing::debug!(key = %key, id, kind = %err.kind(), "inflight.settle"),
    }
    drop(registration);

    // Nobody may be waiting any more
    let _ = tx.send(outcome);
}

/// Outcome seen by waiters when an execution went away without settling
fn dropped() -> AfErrorException {
    AfErrorException::new(AfError::internal().with_cause("execution dropped before settling"))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
