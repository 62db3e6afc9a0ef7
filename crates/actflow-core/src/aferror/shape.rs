//! Shape checks for structured error values

use std::sync::Arc;

use serde_json::Value;

use super::{AfError, ErrorKind, Reason};

const KNOWN_FIELDS: [&str; 7] = ["kind", "message", "status", "code", "reason", "issues", "cause"];

/// Loose check: a string `kind` and a string `message`
pub fn is_af_error_shape(value: &Value) -> bool {
    value.get("kind").is_some_and(Value::is_string)
        && value.get("message").is_some_and(Value::is_string)
}

/// Strict check against the closed [`AfError`] shape
pub fn is_af_error_strict(value: &Value) -> bool {
    parse_strict(value).is_some()
}

pub(super) fn parse_strict(value: &Value) -> Option<AfError> {
    let obj = value.as_object()?;
    if obj.keys().any(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
        return None;
    }

    let kind = ErrorKind::parse(obj.get("kind")?.as_str()?)?;
    let message = obj.get("message")?.as_str()?.to_string();

    let status = match obj.get("status") {
        None => None,
        Some(v) => Some(status_of(v)?),
    };
    if kind == ErrorKind::Server && status.is_none() {
        return None;
    }

    let code = match obj.get("code") {
        None => None,
        Some(v) => Some(v.as_str()?.to_string()),
    };

    let reason = match obj.get("reason") {
        None => None,
        Some(v) => Some(Reason::parse(kind, v.as_str()?)?),
    };

    let issues = match obj.get("issues") {
        None => None,
        Some(v) => Some(v.as_array()?.clone()),
    };
    if kind == ErrorKind::Validation && issues.is_none() {
        return None;
    }

    let cause = obj.get("cause").map(|c| Arc::from(c.to_string()));

    Some(AfError {
        kind,
        message,
        status,
        code,
        reason,
        issues,
        cause,
    })
}

/// Statuses are integral and fit an HTTP-like range
fn status_of(v: &Value) -> Option<u16> {
    v.as_u64().and_then(|n| u16::try_from(n).ok()).or_else(|| {
        let f = v.as_f64()?;
        (f.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&f)).then_some(f as u16)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aferror::ConflictReason;
    use serde_json::json;

    #[test]
    fn test_shape_requires_kind_and_message() {
        assert!(is_af_error_shape(
            &json!({ "kind": "server", "message": "Server error", "status": 500 })
        ));
        assert!(!is_af_error_shape(&json!({ "kind": "server", "status": 500 })));
        assert!(!is_af_error_shape(&json!("server")));
    }

    #[test]
    fn test_strict_status_must_be_numeric() {
        assert!(is_af_error_strict(
            &json!({ "kind": "server", "message": "x", "status": 500 })
        ));
        assert!(!is_af_error_strict(
            &json!({ "kind": "server", "message": "x", "status": "500" })
        ));
        assert!(is_af_error_strict(
            &json!({ "kind": "auth", "message": "x", "status": 401 })
        ));
        assert!(is_af_error_strict(&json!({ "kind": "auth", "message": "x" })));
    }

    #[test]
    fn test_strict_server_requires_status() {
        assert!(!is_af_error_strict(&json!({ "kind": "server", "message": "x" })));
    }

    #[test]
    fn test_strict_validation_requires_issues_sequence() {
        assert!(is_af_error_strict(
            &json!({ "kind": "validation", "message": "x", "issues": [] })
        ));
        assert!(!is_af_error_strict(&json!({ "kind": "validation", "message": "x" })));
        assert!(!is_af_error_strict(
            &json!({ "kind": "validation", "message": "x", "issues": {} })
        ));
    }

    #[test]
    fn test_strict_rejects_unknown_kind_and_fields() {
        assert!(!is_af_error_strict(&json!({ "kind": "weird", "message": "x" })));
        assert!(!is_af_error_strict(
            &json!({ "kind": "internal", "message": "x", "extra": 1 })
        ));
    }

    #[test]
    fn test_strict_reason_must_match_kind() {
        assert!(is_af_error_strict(
            &json!({ "kind": "conflict", "message": "x", "reason": "HTTP_409" })
        ));
        assert!(!is_af_error_strict(
            &json!({ "kind": "conflict", "message": "x", "reason": "TIMEOUT" })
        ));
        assert!(!is_af_error_strict(
            &json!({ "kind": "auth", "message": "x", "reason": "HTTP_409" })
        ));
    }

    #[test]
    fn test_parse_keeps_message_as_given() {
        let af = AfError::from_value(&json!({ "kind": "network", "message": "offline" }))
            .expect("strict shape");
        assert_eq!(af.kind(), ErrorKind::Network);
        assert_eq!(af.message(), "offline");
    }

    #[test]
    fn test_serialized_error_passes_strict_check() {
        let af = AfError::conflict(ConflictReason::UniqueConstraint).with_code("P2002");
        assert!(is_af_error_strict(&af.to_value()));
        assert_eq!(AfError::from_value(&af.to_value()), Some(af));
    }
}
