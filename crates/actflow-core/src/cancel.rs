//! Cancellation tokens with a first-wins reason
//!
//! [`CancelToken`] wraps [`tokio_util::sync::CancellationToken`]. Cancelling a
//! token cancels every child derived from it, and a child reports the reason of
//! whichever ancestor was cancelled first. Cancelling a child never affects its
//! parent.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::aferror::{Aborted, AfError, AfErrorException};

/// Cancellation handle passed to operations and owned by callers
#[derive(Debug, Clone)]
pub struct CancelToken {
    token: CancellationToken,
    /// This token's own reason first, then each ancestor's
    reasons: Arc<[Arc<OnceLock<String>>]>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self {
            token: CancellationToken::new(),
            reasons: Arc::from([Arc::new(OnceLock::new())]),
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with the default reason
    pub fn cancel(&self) {
        self.cancel_with(Aborted::DEFAULT_REASON);
    }

    /// Requests cancellation
    ///
    /// Idempotent: once cancelled, later calls keep the first reason.
    pub fn cancel_with(&self, reason: impl Into<String>) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.reasons[0].set(reason.into());
        self.token.cancel();
    }

    /// Returns true when cancellation is requested on this token or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future resolving when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Owned variant of [`cancelled`](Self::cancelled) for spawned tasks
    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Creates a child token cancelled together with this one.
    pub fn child(&self) -> Self {
        let reasons: Vec<_> = std::iter::once(Arc::new(OnceLock::new()))
            .chain(self.reasons.iter().cloned())
            .collect();
        Self {
            token: self.token.child_token(),
            reasons: Arc::from(reasons),
        }
    }

    /// The reason of the nearest cancelled token in the ancestry
    pub fn reason(&self) -> Option<&str> {
        if !self.is_cancelled() {
            return None;
        }
        self.reasons
            .iter()
            .find_map(|r| r.get())
            .map(String::as_str)
            .or(Some(Aborted::DEFAULT_REASON))
    }

    /// The cancellation cause for this token
    pub fn aborted(&self) -> Aborted {
        Aborted::new(self.reason().unwrap_or(Aborted::DEFAULT_REASON))
    }

    /// The `cancelled` exception for this token
    pub fn to_exception(&self) -> AfErrorException {
        AfErrorException::new(AfError::cancelled().with_cause(&self.aborted()))
    }

    /// The underlying tokio-util token
    pub fn as_token(&self) -> &CancellationToken {
        &self.token
    }
}
