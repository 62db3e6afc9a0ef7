//! Optimistic state updates over a baseline snapshot
//!
//! An [`OptimisticManager`] keeps an ordered log of patches applied on top of
//! a baseline taken when the first patch arrives. Every change replays the
//! whole log from the baseline and publishes the result through the `write`
//! callback, so rolling back a patch in the middle of the log is exact.
//!
//! `read`, `clone` and the patches run under the manager lock and must not
//! call back into the manager. `write` and the event observer run with the
//! lock released and may apply or settle patches; publications are always
//! delivered in the order the changes were made.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::{Deserialize, Serialize};

/// What a committed patch contributes to the published state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitBehavior {
    /// Committed patches stay applied and fold into the baseline
    #[default]
    Keep,
    /// Committed patches are dropped; the server result is expected to arrive through `read`
    Remove,
}

impl std::str::FromStr for CommitBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Self::Keep),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown commit behavior '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchStatus {
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisticEventKind {
    Apply,
    Commit,
    Rollback,
    Compact,
}

impl OptimisticEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Compact => "compact",
        }
    }
}

impl fmt::Display for OptimisticEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published after every state change
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEvent<T> {
    pub kind: OptimisticEventKind,
    /// Patch id; absent for `compact`
    pub id: Option<String>,
    /// Patches still pending after the change
    pub pending: usize,
    /// The state just published, or `read()` when the log emptied
    pub state: T,
}

type ReadFn<T> = Arc<dyn Fn() -> T + Send + Sync>;
type WriteFn<T> = Box<dyn Fn(T) + Send + Sync>;
type CloneFn<T> = Box<dyn Fn(&T) -> T + Send + Sync>;
type PatchFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;
type EventFn<T> = Box<dyn Fn(&OptimisticEvent<T>) + Send + Sync>;

struct PatchEntry<T> {
    id: String,
    patch: PatchFn<T>,
    status: PatchStatus,
}

/// A state change waiting to reach `write` and the observer
struct Publication<T> {
    kind: OptimisticEventKind,
    id: Option<String>,
    pending: usize,
    /// `None` once the log emptied: nothing is written and the event
    /// carries `read()` taken at delivery
    view: Option<T>,
}

struct State<T> {
    read: ReadFn<T>,
    clone: CloneFn<T>,
    commit_behavior: CommitBehavior,
    baseline: Option<T>,
    entries: Vec<PatchEntry<T>>,
    next_id: u64,
    outbox: VecDeque<Publication<T>>,
    delivering: bool,
}

impl<T: Clone> State<T> {
    fn skips(&self, status: PatchStatus) -> bool {
        match status {
            PatchStatus::Pending => false,
            PatchStatus::Committed => self.commit_behavior == CommitBehavior::Remove,
            PatchStatus::RolledBack => true,
        }
    }

    /// Replay the log from the baseline
    fn recompute(&self) -> T {
        let Some(baseline) = &self.baseline else {
            return (self.read)();
        };
        let mut draft = (self.clone)(baseline);
        for entry in &self.entries {
            if !self.skips(entry.status) {
                (entry.patch)(&mut draft);
            }
        }
        draft
    }

    fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == PatchStatus::Pending)
            .count()
    }

    /// Queue the replayed view for `write` and the observer
    fn publish(&mut self, kind: OptimisticEventKind, id: Option<&str>) {
        let next = self.recompute();
        self.queue(kind, id, Some(next));
    }

    fn queue(&mut self, kind: OptimisticEventKind, id: Option<&str>, view: Option<T>) {
        tracing::trace!(event = %kind, entries = self.entries.len(), "optimistic change queued");
        let pending = self.pending_count();
        self.outbox.push_back(Publication {
            kind,
            id: id.map(str::to_string),
            pending,
            view,
        });
    }

    /// Move a pending entry to `status`; false when it is unknown or already settled
    fn settle(&mut self, id: &str, status: PatchStatus) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.id == id && e.status == PatchStatus::Pending)
        {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    fn compact(&mut self) {
        let Some(baseline) = &self.baseline else {
            return;
        };
        if self.entries.is_empty() {
            return;
        }

        if self.commit_behavior == CommitBehavior::Keep {
            let folded = self
                .entries
                .iter()
                .take_while(|e| e.status == PatchStatus::Committed)
                .count();
            if folded > 0 {
                let mut next_baseline = (self.clone)(baseline);
                for entry in self.entries.drain(..folded) {
                    (entry.patch)(&mut next_baseline);
                }
                self.baseline = Some(next_baseline);
            }
        }

        let remove_committed = self.commit_behavior == CommitBehavior::Remove;
        self.entries.retain(|e| match e.status {
            PatchStatus::Pending => true,
            PatchStatus::Committed => !remove_committed,
            PatchStatus::RolledBack => false,
        });

        if self.entries.is_empty() {
            self.baseline = None;
            self.queue(OptimisticEventKind::Compact, None, None);
            return;
        }

        self.publish(OptimisticEventKind::Compact, None);
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    read: ReadFn<T>,
    write: WriteFn<T>,
    on_event: Option<EventFn<T>>,
}

impl<T: Clone> Inner<T> {
    /// Drain the outbox with the lock released between publications
    ///
    /// Returns at once when a caller further up the stack, or on another
    /// thread, is already draining; that caller delivers what was queued.
    fn deliver<'a>(&'a self, mut state: MutexGuard<'a, State<T>>) {
        if state.delivering {
            return;
        }
        state.delivering = true;
        let _reset = DeliveryReset(self);

        loop {
            let Some(publication) = state.outbox.pop_front() else {
                break;
            };
            drop(state);
            self.dispatch(publication);
            state = lock(&self.state);
        }
        state.delivering = false;
    }

    fn dispatch(&self, publication: Publication<T>) {
        let event = OptimisticEvent {
            kind: publication.kind,
            id: publication.id,
            pending: publication.pending,
            state: match &publication.view {
                Some(view) => view.clone(),
                None => (self.read)(),
            },
        };
        tracing::debug!(
            event = %event.kind,
            id = event.id.as_deref().unwrap_or("-"),
            pending = event.pending,
            "optimistic.{}",
            event.kind
        );
        if let Some(view) = publication.view {
            (self.write)(view);
        }
        if let Some(on_event) = &self.on_event {
            on_event(&event);
        }
    }
}

/// Lets a later change drain again after `write` or the observer panicked
struct DeliveryReset<'a, T>(&'a Inner<T>);

impl<T> Drop for DeliveryReset<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            lock(&self.0.state).delivering = false;
        }
    }
}

/// Builder for [`OptimisticManager`]
pub struct OptimisticManagerBuilder<T> {
    read: ReadFn<T>,
    write: WriteFn<T>,
    clone: Option<CloneFn<T>>,
    on_event: Option<EventFn<T>>,
    commit_behavior: CommitBehavior,
}

impl<T: Clone + Send + 'static> OptimisticManagerBuilder<T> {
    pub fn commit_behavior(mut self, behavior: CommitBehavior) -> Self {
        self.commit_behavior = behavior;
        self
    }

    /// Snapshot function used for the baseline and each replay
    ///
    /// Defaults to [`Clone::clone`].
    pub fn clone_with(mut self, clone: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        self.clone = Some(Box::new(clone));
        self
    }

    pub fn on_event(
        mut self,
        observer: impl Fn(&OptimisticEvent<T>) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> OptimisticManager<T> {
        let clone: CloneFn<T> = match self.clone {
            Some(clone) => clone,
            None => Box::new(T::clone),
        };
        let state = State {
            read: Arc::clone(&self.read),
            clone,
            commit_behavior: self.commit_behavior,
            baseline: None,
            entries: Vec::new(),
            next_id: 0,
            outbox: VecDeque::new(),
            delivering: false,
        };
        OptimisticManager {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                read: self.read,
                write: self.write,
                on_event: self.on_event,
            }),
        }
    }
}

/// Ordered log of speculative patches over a store
pub struct OptimisticManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for OptimisticManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for OptimisticManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("OptimisticManager")
            .field("commit_behavior", &state.commit_behavior)
            .field("entries", &state.entries.len())
            .field("has_baseline", &state.baseline.is_some())
            .finish()
    }
}

fn lock<T>(state: &Mutex<State<T>>) -> MutexGuard<'_, State<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> OptimisticManager<T> {
    /// Manager over a store exposed as `read` and `write`, with default options
    pub fn new(
        read: impl Fn() -> T + Send + Sync + 'static,
        write: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self::builder(read, write).build()
    }

    pub fn builder(
        read: impl Fn() -> T + Send + Sync + 'static,
        write: impl Fn(T) + Send + Sync + 'static,
    ) -> OptimisticManagerBuilder<T> {
        OptimisticManagerBuilder {
            read: Arc::new(read),
            write: Box::new(write),
            clone: None,
            on_event: None,
            commit_behavior: CommitBehavior::default(),
        }
    }

    /// Apply `patch` speculatively and publish the result
    ///
    /// The first pending patch snapshots the store as the baseline. `patch`
    /// may run many times, once per replay, and must be deterministic.
    pub fn apply_patch(&self, patch: impl Fn(&mut T) + Send + Sync + 'static) -> PatchHandle<T> {
        let mut state = lock(&self.inner.state);

        state.next_id += 1;
        let id = format!("opt:{}", state.next_id);

        if state.baseline.is_none() {
            let snapshot = (state.read)();
            state.baseline = Some((state.clone)(&snapshot));
        }

        state.entries.push(PatchEntry {
            id: id.clone(),
            patch: Box::new(patch),
            status: PatchStatus::Pending,
        });
        state.publish(OptimisticEventKind::Apply, Some(&id));
        self.inner.deliver(state);

        PatchHandle {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Entries currently in the log, settled ones included
    pub fn entry_count(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state).pending_count()
    }

    pub fn has_baseline(&self) -> bool {
        lock(&self.inner.state).baseline.is_some()
    }

    pub fn commit_behavior(&self) -> CommitBehavior {
        lock(&self.inner.state).commit_behavior
    }
}

/// Handle to one applied patch
///
/// `commit` and `rollback` only act on a pending patch; later calls are no-ops.
pub struct PatchHandle<T> {
    id: String,
    inner: Arc<Inner<T>>,
}

impl<T> fmt::Debug for PatchHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchHandle").field("id", &self.id).finish()
    }
}

impl<T: Clone> PatchHandle<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mark the patch confirmed
    pub fn commit(&self) {
        self.finish(PatchStatus::Committed, OptimisticEventKind::Commit);
    }

    /// Withdraw the patch, replaying the others from the baseline
    pub fn rollback(&self) {
        self.finish(PatchStatus::RolledBack, OptimisticEventKind::Rollback);
    }

    fn finish(&self, status: PatchStatus, kind: OptimisticEventKind) {
        let mut state = lock(&self.inner.state);
        if !state.settle(&self.id, status) {
            tracing::trace!(id = %self.id, "optimistic patch already settled");
            return;
        }
        state.publish(kind, Some(&self.id));
        state.compact();
        self.inner.deliver(state);
    }
}
