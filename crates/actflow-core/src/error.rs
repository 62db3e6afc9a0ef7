//! Error types for actflow-core
//!
//! These are programmer and configuration errors raised synchronously at the
//! call site. Runtime failures of wrapped operations are reported as
//! [`AfErrorException`](crate::aferror::AfErrorException) instead.

use std::fmt;

use thiserror::Error;

/// Result type alias using actflow-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine-readable codes for invalid arguments passed to this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidArgumentCode {
    BackoffInvalidAttempt,
    BackoffInvalidBase,
    BackoffInvalidFactor,
    BackoffInvalidMax,
    BackoffBaseGtMax,
    ScheduleNegativeCount,
    ScheduleTooLarge,
    IdempEmpty,
    IdempCircular,
    IdempUnsupportedType,
    KeyUnknownResource,
    KeyMissingParam,
    KeyUnexpectedParam,
    KeyInvalidParam,
}

impl InvalidArgumentCode {
    /// Wire form of the code, e.g. `BACKOFF_INVALID_ATTEMPT`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackoffInvalidAttempt => "BACKOFF_INVALID_ATTEMPT",
            Self::BackoffInvalidBase => "BACKOFF_INVALID_BASE",
            Self::BackoffInvalidFactor => "BACKOFF_INVALID_FACTOR",
            Self::BackoffInvalidMax => "BACKOFF_INVALID_MAX",
            Self::BackoffBaseGtMax => "BACKOFF_BASE_GT_MAX",
            Self::ScheduleNegativeCount => "SCHEDULE_NEGATIVE_COUNT",
            Self::ScheduleTooLarge => "SCHEDULE_TOO_LARGE",
            Self::IdempEmpty => "IDEMP_EMPTY",
            Self::IdempCircular => "IDEMP_CIRCULAR",
            Self::IdempUnsupportedType => "IDEMP_UNSUPPORTED_TYPE",
            Self::KeyUnknownResource => "KEY_UNKNOWN_RESOURCE",
            Self::KeyMissingParam => "KEY_MISSING_PARAM",
            Self::KeyUnexpectedParam => "KEY_UNEXPECTED_PARAM",
            Self::KeyInvalidParam => "KEY_INVALID_PARAM",
        }
    }
}

impl fmt::Display for InvalidArgumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error types for actflow
#[derive(Error, Debug)]
pub enum Error {
    /// An argument violated a documented precondition
    #[error("{message}")]
    InvalidArgument {
        code: InvalidArgumentCode,
        message: String,
    },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(code: InvalidArgumentCode, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            code,
            message: message.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// The invalid-argument code, if this is an invalid-argument error
    pub fn invalid_argument_code(&self) -> Option<InvalidArgumentCode> {
        match self {
            Self::InvalidArgument { code, .. } => Some(*code),
            _ => None,
        }
    }
}
