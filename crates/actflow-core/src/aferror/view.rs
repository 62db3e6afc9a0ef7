//! Structured view over heterogeneous failure values

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use serde_json::Value;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;

use super::{AfError, AfErrorException};
use crate::error::Error;

/// A read-only, duck-typed view of a failure
///
/// Classification only ever asks four questions of a raw failure: is it already
/// classified, what numeric field does it carry, what text field does it carry
/// and what nested record does it carry. The field names follow the usual
/// conventions of error objects: `name`, `code`, `message`, `status` and
/// `response`.
pub trait FailureView: fmt::Debug {
    /// The already-classified error this value carries, if any
    fn as_af_error(&self) -> Option<AfError> {
        None
    }

    /// A numeric field
    fn number(&self, field: &str) -> Option<f64> {
        let _ = field;
        None
    }

    /// A text field
    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        let _ = field;
        None
    }

    /// A nested record
    fn nested(&self, field: &str) -> Option<&dyn FailureView> {
        let _ = field;
        None
    }
}

impl<T: FailureView + ?Sized> FailureView for &T {
    fn as_af_error(&self) -> Option<AfError> {
        (**self).as_af_error()
    }

    fn number(&self, field: &str) -> Option<f64> {
        (**self).number(field)
    }

    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        (**self).text(field)
    }

    fn nested(&self, field: &str) -> Option<&dyn FailureView> {
        (**self).nested(field)
    }
}

/// The cause attached to failures produced by cancellation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Aborted {
    reason: String,
}

impl Aborted {
    pub const NAME: &'static str = "AbortError";
    pub const DEFAULT_REASON: &'static str = "Aborted";

    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Default for Aborted {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REASON)
    }
}

impl FailureView for Aborted {
    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match field {
            "name" => Some(Cow::Borrowed(Self::NAME)),
            "message" => Some(Cow::Borrowed(&self.reason)),
            _ => None,
        }
    }
}

impl FailureView for Value {
    fn as_af_error(&self) -> Option<AfError> {
        if let Some(af) = AfError::from_value(self) {
            return Some(af);
        }
        if self.get("name").and_then(Value::as_str) == Some("AFErrorException") {
            return self.get("af").and_then(AfError::from_value);
        }
        None
    }

    fn number(&self, field: &str) -> Option<f64> {
        self.get(field)?.as_f64()
    }

    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        self.get(field)?.as_str().map(Cow::Borrowed)
    }

    fn nested(&self, field: &str) -> Option<&dyn FailureView> {
        self.get(field)
            .filter(|v| v.is_object())
            .map(|v| v as &dyn FailureView)
    }
}

impl FailureView for AfError {
    fn as_af_error(&self) -> Option<AfError> {
        Some(self.clone())
    }

    fn number(&self, field: &str) -> Option<f64> {
        match field {
            "status" => self.status().map(f64::from),
            _ => None,
        }
    }

    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match field {
            "message" => Some(Cow::Borrowed(self.message())),
            "code" => self.code().map(Cow::Borrowed),
            _ => None,
        }
    }
}

impl FailureView for AfErrorException {
    fn as_af_error(&self) -> Option<AfError> {
        Some(self.af().clone())
    }

    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match field {
            "name" => Some(Cow::Borrowed("AFErrorException")),
            _ => self.af().text(field),
        }
    }
}

impl FailureView for Error {
    fn as_af_error(&self) -> Option<AfError> {
        match self {
            Error::Io(e) => e.as_af_error(),
            _ => None,
        }
    }

    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match (self, field) {
            (Error::Io(e), _) => e.text(field),
            (Error::InvalidArgument { .. }, "name") => Some(Cow::Borrowed("InvalidArgumentError")),
            (Error::InvalidArgument { code, .. }, "code") => Some(Cow::Borrowed(code.as_str())),
            (_, "message") => Some(Cow::Owned(self.to_string())),
            _ => None,
        }
    }
}

/// POSIX-style code for transport-related io error kinds
fn io_code(kind: io::ErrorKind) -> Option<&'static str> {
    use io::ErrorKind as K;
    Some(match kind {
        K::TimedOut => "ETIMEDOUT",
        K::ConnectionReset => "ECONNRESET",
        K::ConnectionRefused => "ECONNREFUSED",
        K::ConnectionAborted => "ECONNABORTED",
        K::BrokenPipe => "EPIPE",
        K::HostUnreachable => "EHOSTUNREACH",
        K::NetworkUnreachable => "ENETUNREACH",
        K::NetworkDown => "ENETDOWN",
        K::NotConnected => "ENOTCONN",
        _ => return None,
    })
}

impl FailureView for io::Error {
    fn as_af_error(&self) -> Option<AfError> {
        let inner = self.get_ref()?;
        inner
            .downcast_ref::<AfErrorException>()
            .map(|ex| ex.af().clone())
    }

    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match field {
            "code" => io_code(self.kind()).map(Cow::Borrowed),
            "message" => Some(Cow::Owned(self.to_string())),
            _ => None,
        }
    }
}

impl FailureView for Elapsed {
    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match field {
            "code" => Some(Cow::Borrowed("ETIMEDOUT")),
            "message" => Some(Cow::Owned(self.to_string())),
            _ => None,
        }
    }
}

impl FailureView for JoinError {
    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        match field {
            "name" if self.is_cancelled() => Some(Cow::Borrowed(Aborted::NAME)),
            "message" => Some(Cow::Owned(self.to_string())),
            _ => None,
        }
    }
}

impl FailureView for str {
    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        (field == "message").then_some(Cow::Borrowed(self))
    }
}

impl FailureView for String {
    fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        self.as_str().text(field)
    }
}

/// Find a known failure type in an error chain
fn known_view<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a dyn FailureView> {
    std::iter::successors(Some(err), |&e: &&'a (dyn StdError + 'static)| e.source()).find_map(|e| {
        if let Some(v) = e.downcast_ref::<AfErrorException>() {
            Some(v as &dyn FailureView)
        } else if let Some(v) = e.downcast_ref::<Error>() {
            Some(v as &dyn FailureView)
        } else if let Some(v) = e.downcast_ref::<Aborted>() {
            Some(v as &dyn FailureView)
        } else if let Some(v) = e.downcast_ref::<io::Error>() {
            Some(v as &dyn FailureView)
        } else if let Some(v) = e.downcast_ref::<Elapsed>() {
            Some(v as &dyn FailureView)
        } else if let Some(v) = e.downcast_ref::<JoinError>() {
            Some(v as &dyn FailureView)
        } else {
            None
        }
    })
}

/// Delegate to a known failure in the chain, falling back to the outer message
macro_rules! chained_view {
    ($ty:ty) => {
        impl FailureView for $ty {
            fn as_af_error(&self) -> Option<AfError> {
                known_view(&**self)?.as_af_error()
            }

            fn number(&self, field: &str) -> Option<f64> {
                known_view(&**self)?.number(field)
            }

            fn text(&self, field: &str) -> Option<Cow<'_, str>> {
                match known_view(&**self) {
                    Some(view) => view.text(field),
                    None if field == "message" => Some(Cow::Owned(self.to_string())),
                    None => None,
                }
            }
        }
    };
}

chained_view!(anyhow::Error);
chained_view!(Box<dyn StdError + Send + Sync>);
