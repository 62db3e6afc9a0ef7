//! Total classification of raw failures into [`AfError`]

use std::sync::LazyLock;

use regex::Regex;

use super::view::{Aborted, FailureView};
use super::{AfError, ConflictReason, NetworkReason};

static UNIQUE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)P2002|UNIQUE").expect("unique code regex is valid"));
static REVISION_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CONFLICT|REVISION|VERSION").expect("revision code regex is valid")
});
static UNIQUE_MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)unique constraint").expect("unique message regex is valid"));
static CONFLICT_MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)conflict").expect("conflict message regex is valid"));

static TIMEOUT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(ETIMEDOUT|ESOCKETTIMEDOUT)$").expect("timeout code regex is valid")
});
static CONNRESET_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(ECONNRESET|ECONNABORTED|EPIPE|ENETRESET|ENOTCONN)$")
        .expect("connreset code regex is valid")
});
static DNS_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(EAI_AGAIN|ENOTFOUND|EDNS\w*)$").expect("dns code regex is valid")
});
static UNREACHABLE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(EHOSTUNREACH|ENETUNREACH|ENETDOWN|ECONNREFUSED)$")
        .expect("unreachable code regex is valid")
});

static NETWORK_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)network|fetch|socket|timeout|timed out|\bdns\b|unreachable|ECONN|ENET|EAI_")
        .expect("network message regex is valid")
});
static TIMEOUT_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)timeout|timed out|ETIMEDOUT").expect("timeout message regex is valid")
});
static DNS_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdns\b|getaddrinfo|EAI_AGAIN|ENOTFOUND").expect("dns message regex is valid")
});
static UNREACHABLE_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unreachable|refused|ENETDOWN").expect("unreachable message regex is valid")
});
static CONNRESET_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)reset|hang up|ECONNABORTED|EPIPE").expect("connreset message regex is valid")
});

const CANCEL_CODES: [&str; 2] = ["ABORT_ERR", "CANCELLED"];

/// Map an arbitrary failure into the taxonomy
///
/// First match wins:
///
/// 1. values that already are (or carry) an [`AfError`] are returned unchanged
/// 2. cancellation signals become `cancelled`
/// 3. invalid-argument errors become `internal` with their code
/// 4. status 401 and 403 become `auth`
/// 5. conflict signals become `conflict`
/// 6. any other status becomes `server`
/// 7. transport codes and network-ish messages become `network`
/// 8. everything else becomes `internal`
///
/// This never fails and never panics.
pub fn classify<E: FailureView + ?Sized>(raw: &E) -> AfError {
    classify_view(&raw)
}

fn classify_view(raw: &dyn FailureView) -> AfError {
    if let Some(af) = raw.as_af_error() {
        return af;
    }

    let name = raw.text("name");
    let code = raw.text("code");
    let message = raw.text("message");

    if name.as_deref() == Some(Aborted::NAME)
        || code.as_deref().is_some_and(|c| CANCEL_CODES.contains(&c))
    {
        return AfError::cancelled().with_cause(raw);
    }

    if name.as_deref() == Some("InvalidArgumentError") {
        let af = AfError::internal().with_cause(raw);
        return match code {
            Some(code) => af.with_code(code),
            None => af,
        };
    }

    let status = extract_status(raw);
    match status {
        Some(401) => return AfError::auth("UNAUTHENTICATED").with_cause(raw),
        Some(403) => return AfError::auth("FORBIDDEN").with_cause(raw),
        _ => {}
    }

    if let Some(reason) = conflict_reason(status, code.as_deref(), message.as_deref()) {
        let af = AfError::conflict(reason).with_cause(raw);
        return match status {
            Some(status) => af.with_status(status),
            None => af,
        };
    }

    if let Some(status) = status {
        return AfError::server(status).with_cause(raw);
    }

    if let Some(reason) = network_reason(code.as_deref(), message.as_deref()) {
        return AfError::network(reason).with_cause(raw);
    }

    AfError::internal().with_cause(raw)
}

/// Status from `status` or `response.status`, when integral and in range
fn extract_status(raw: &dyn FailureView) -> Option<u16> {
    let n = raw
        .number("status")
        .or_else(|| raw.nested("response")?.number("status"))?;
    if n.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&n) {
        Some(n as u16)
    } else {
        None
    }
}

fn conflict_reason(
    status: Option<u16>,
    code: Option<&str>,
    message: Option<&str>,
) -> Option<ConflictReason> {
    if status == Some(409) {
        return Some(ConflictReason::Http409);
    }
    if let Some(code) = code {
        if UNIQUE_CODE_RE.is_match(code) {
            return Some(ConflictReason::UniqueConstraint);
        }
        if REVISION_CODE_RE.is_match(code) {
            return Some(ConflictReason::RevisionMismatch);
        }
    }
    let message = message?;
    if UNIQUE_MESSAGE_RE.is_match(message) {
        Some(ConflictReason::UniqueConstraint)
    } else if CONFLICT_MESSAGE_RE.is_match(message) {
        Some(ConflictReason::RevisionMismatch)
    } else {
        None
    }
}

/// `Some(reason)` when the failure looks like a transport failure
///
/// The inner option is the best matching reason, if any.
fn network_reason(code: Option<&str>, message: Option<&str>) -> Option<Option<NetworkReason>> {
    if let Some(code) = code {
        let by_code = [
            (&*TIMEOUT_CODE_RE, NetworkReason::Timeout),
            (&*CONNRESET_CODE_RE, NetworkReason::Connreset),
            (&*DNS_CODE_RE, NetworkReason::Dns),
            (&*UNREACHABLE_CODE_RE, NetworkReason::Unreachable),
        ];
        if let Some((_, reason)) = by_code.iter().find(|(re, _)| re.is_match(code)) {
            return Some(Some(*reason));
        }
    }

    let message = message?;
    if !NETWORK_MESSAGE_RE.is_match(message) {
        return None;
    }
    let by_message = [
        (&*TIMEOUT_MESSAGE_RE, NetworkReason::Timeout),
        (&*DNS_MESSAGE_RE, NetworkReason::Dns),
        (&*UNREACHABLE_MESSAGE_RE, NetworkReason::Unreachable),
        (&*CONNRESET_MESSAGE_RE, NetworkReason::Connreset),
    ];
    Some(
        by_message
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, reason)| *reason),
    )
}
