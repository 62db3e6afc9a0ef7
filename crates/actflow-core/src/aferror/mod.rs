//! Closed error taxonomy shared by every actflow component
//!
//! Any failure that crosses a public boundary is reported as an
//! [`AfErrorException`] holding exactly one [`AfError`]. Raw failures of
//! unknown origin are normalised by [`classify`], which sees them through the
//! [`FailureView`] trait instead of inspecting concrete types.
//!
//! # Example
//!
//! ```rust
//! use actflow_core::aferror::{classify, is_retryable, ErrorKind};
//! use serde_json::json;
//!
//! let af = classify(&json!({ "status": 503, "message": "upstream down" }));
//! assert_eq!(af.kind(), ErrorKind::Server);
//! assert_eq!(af.status(), Some(503));
//! assert!(is_retryable(&af));
//! ```

mod classify;
mod shape;
mod view;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use classify::classify;
pub use shape::{is_af_error_shape, is_af_error_strict};
pub use view::{Aborted, FailureView};

/// Discriminant of an [`AfError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Auth,
    Server,
    Conflict,
    Network,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// All kinds, in taxonomy order
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Validation,
        ErrorKind::Auth,
        ErrorKind::Server,
        ErrorKind::Conflict,
        ErrorKind::Network,
        ErrorKind::Cancelled,
        ErrorKind::Internal,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Server => "server",
            Self::Conflict => "conflict",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a conflict was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictReason {
    #[serde(rename = "HTTP_409")]
    Http409,
    #[serde(rename = "UNIQUE_CONSTRAINT")]
    UniqueConstraint,
    #[serde(rename = "REVISION_MISMATCH")]
    RevisionMismatch,
}

/// Best-effort transport failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkReason {
    Timeout,
    Connreset,
    Dns,
    Unreachable,
}

/// A reason attached to a conflict or network error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Reason {
    Conflict(ConflictReason),
    Network(NetworkReason),
}

impl Reason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict(ConflictReason::Http409) => "HTTP_409",
            Self::Conflict(ConflictReason::UniqueConstraint) => "UNIQUE_CONSTRAINT",
            Self::Conflict(ConflictReason::RevisionMismatch) => "REVISION_MISMATCH",
            Self::Network(NetworkReason::Timeout) => "TIMEOUT",
            Self::Network(NetworkReason::Connreset) => "CONNRESET",
            Self::Network(NetworkReason::Dns) => "DNS",
            Self::Network(NetworkReason::Unreachable) => "UNREACHABLE",
        }
    }

    /// Parse a reason that is valid for `kind`
    pub fn parse(kind: ErrorKind, s: &str) -> Option<Self> {
        let candidates: &[Reason] = match kind {
            ErrorKind::Conflict => &[
                Self::Conflict(ConflictReason::Http409),
                Self::Conflict(ConflictReason::UniqueConstraint),
                Self::Conflict(ConflictReason::RevisionMismatch),
            ],
            ErrorKind::Network => &[
                Self::Network(NetworkReason::Timeout),
                Self::Network(NetworkReason::Connreset),
                Self::Network(NetworkReason::Dns),
                Self::Network(NetworkReason::Unreachable),
            ],
            _ => &[],
        };
        candidates.iter().copied().find(|r| r.as_str() == s)
    }

    fn kind(self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Network(_) => ErrorKind::Network,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConflictReason> for Reason {
    fn from(reason: ConflictReason) -> Self {
        Self::Conflict(reason)
    }
}

impl From<NetworkReason> for Reason {
    fn from(reason: NetworkReason) -> Self {
        Self::Network(reason)
    }
}

/// Server statuses the default retry policy treats as transient
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// An immutable, classified failure
///
/// The message is synthesised from the kind and its detail fields. The cause
/// is a diagnostic rendering of the original failure: it is never inspected by
/// classification or retry logic and is skipped on serialisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AfError {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<Reason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<Vec<Value>>,
    #[serde(skip)]
    cause: Option<Arc<str>>,
}

impl AfError {
    fn bare(kind: ErrorKind) -> Self {
        let mut af = Self {
            kind,
            message: String::new(),
            status: None,
            code: None,
            reason: None,
            issues: None,
            cause: None,
        };
        af.message = af.render_message();
        af
    }

    /// Input failed schema checks
    pub fn validation(issues: Vec<Value>) -> Self {
        Self::bare(ErrorKind::Validation).with_issues(issues)
    }

    /// Authentication or authorization failure, e.g. `UNAUTHENTICATED`
    pub fn auth(code: impl Into<String>) -> Self {
        Self::bare(ErrorKind::Auth).with_code(code)
    }

    /// General failure with an HTTP-like status
    pub fn server(status: u16) -> Self {
        Self::bare(ErrorKind::Server).with_status(status)
    }

    pub fn conflict(reason: ConflictReason) -> Self {
        Self::bare(ErrorKind::Conflict).with_reason(reason)
    }

    /// Transport failure, with a reason when one could be determined
    pub fn network(reason: Option<NetworkReason>) -> Self {
        let af = Self::bare(ErrorKind::Network);
        match reason {
            Some(reason) => af.with_reason(reason),
            None => af,
        }
    }

    pub fn cancelled() -> Self {
        Self::bare(ErrorKind::Cancelled)
    }

    pub fn internal() -> Self {
        Self::bare(ErrorKind::Internal)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self.message = self.render_message();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self.message = self.render_message();
        self
    }

    /// Attach a reason
    ///
    /// A reason belonging to a different kind is ignored so that the value
    /// stays inside the closed shape.
    pub fn with_reason(mut self, reason: impl Into<Reason>) -> Self {
        let reason = reason.into();
        if reason.kind() == self.kind {
            self.reason = Some(reason);
            self.message = self.render_message();
        }
        self
    }

    pub fn with_issues(mut self, issues: Vec<Value>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Record a diagnostic rendering of the original failure
    pub fn with_cause(mut self, cause: &(impl fmt::Debug + ?Sized)) -> Self {
        self.cause = Some(Arc::from(format!("{cause:?}")));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn reason(&self) -> Option<Reason> {
        self.reason
    }

    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        match self.reason {
            Some(Reason::Conflict(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn network_reason(&self) -> Option<NetworkReason> {
        match self.reason {
            Some(Reason::Network(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn issues(&self) -> Option<&[Value]> {
        self.issues.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// See [`is_retryable`]
    pub fn is_retryable(&self) -> bool {
        is_retryable(self)
    }

    /// Serialise to a structured value (the cause is omitted)
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse a structured value that passes [`is_af_error_strict`]
    ///
    /// The message is taken as given rather than re-synthesised.
    pub fn from_value(value: &Value) -> Option<Self> {
        shape::parse_strict(value)
    }

    fn render_message(&self) -> String {
        let detail = match self.kind {
            ErrorKind::Validation | ErrorKind::Cancelled => None,
            ErrorKind::Auth | ErrorKind::Internal => self.code.clone(),
            ErrorKind::Server => self.status.map(|s| s.to_string()),
            ErrorKind::Conflict | ErrorKind::Network => self.reason.map(|r| r.to_string()),
        };
        let label = match self.kind {
            ErrorKind::Validation => "Validation error",
            ErrorKind::Auth => "Auth error",
            ErrorKind::Server => "Server error",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Network => "Network error",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal error",
        };
        match detail {
            Some(detail) => format!("{label} ({detail})"),
            None => label.to_string(),
        }
    }
}

impl fmt::Display for AfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The canonical error returned across every public async boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .0.message())]
pub struct AfErrorException(AfError);

impl AfErrorException {
    pub fn new(af: AfError) -> Self {
        Self(af)
    }

    pub fn af(&self) -> &AfError {
        &self.0
    }

    pub fn into_af(self) -> AfError {
        self.0
    }

    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl From<AfError> for AfErrorException {
    fn from(af: AfError) -> Self {
        Self(af)
    }
}

/// Default retry policy: network failures and transient server statuses
pub fn is_retryable(e: &AfError) -> bool {
    match e.kind {
        ErrorKind::Network => true,
        ErrorKind::Server => e.status.is_some_and(|s| RETRYABLE_STATUSES.contains(&s)),
        _ => false,
    }
}

/// Classify `raw` and wrap it in the canonical exception
pub fn wrap<E: FailureView + ?Sized>(raw: &E) -> AfErrorException {
    AfErrorException(classify(raw))
}

/// Extract the [`AfError`] carried by an exception, classifying anything else
pub fn get_af_error<E: FailureView + ?Sized>(raw: &E) -> AfError {
    classify(raw)
}

/// Fail with the classified form of `raw`
pub fn fail<T, E: FailureView + ?Sized>(raw: &E) -> Result<T, AfErrorException> {
    Err(wrap(raw))
}

/// Fail with a `cancelled` exception carrying an [`Aborted`] cause
pub fn cancel<T>(reason: Option<&str>) -> Result<T, AfErrorException> {
    let aborted = Aborted::new(reason.unwrap_or(Aborted::DEFAULT_REASON));
    Err(AfErrorException(AfError::cancelled().with_cause(&aborted)))
}
