//! Error types for the SheetGate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Every error is `Clone`
//! because a single physical-call outcome is shared between all the callers
//! it was deduplicated for.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all SheetGate operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // --- External service errors ---
    #[error("External error: {0}")]
    External(#[from] ExternalError),

    // --- Circuit breaker ---
    #[error("Circuit breaker open for '{target}', retry in {}ms", .retry_after.as_millis())]
    BreakerOpen {
        target: String,
        retry_after: Duration,
    },

    // --- Task errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// --- Bounded context errors ---

/// A failure reported by (or while reaching) the external spreadsheet service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalError {
    /// Network failure, 5xx, or quota exhaustion. Safe to retry.
    #[error("transient failure{}: {message}", fmt_status(.status))]
    Transient {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        message: String,
    },

    /// The request itself was rejected (4xx validation). Retrying cannot help.
    #[error("permanent failure{}: {message}", fmt_status(.status))]
    Permanent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        message: String,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status: {s})")).unwrap_or_default()
}

impl ExternalError {
    pub fn transient(message: impl Into<String>) -> Self {
        ExternalError::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ExternalError::Permanent {
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code the way the external service uses them:
    /// 408, 429 and 5xx are transient, every other 4xx is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 408 || status == 429 || status >= 500 {
            ExternalError::Transient {
                status: Some(status),
                message,
            }
        } else {
            ExternalError::Permanent {
                status: Some(status),
                message,
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ExternalError::Transient { message, .. } | ExternalError::Permanent { message, .. } => {
                message
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Result of task {id} unavailable in state {state}")]
    ResultUnavailable { id: String, state: String },
}

/// Machine-readable error classification.
///
/// Callers branch on this instead of parsing error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientExternal,
    PermanentExternal,
    BreakerOpen,
    TaskNotFound,
    InvalidTaskTransition,
    TaskResultUnavailable,
    Config,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may retry an operation that failed with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientExternal | ErrorKind::BreakerOpen)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::External(ExternalError::Transient { .. }) => ErrorKind::TransientExternal,
            Error::External(ExternalError::Permanent { .. }) => ErrorKind::PermanentExternal,
            Error::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            Error::Task(TaskError::NotFound(_)) => ErrorKind::TaskNotFound,
            Error::Task(TaskError::InvalidTransition { .. }) => ErrorKind::InvalidTaskTransition,
            Error::Task(TaskError::ResultUnavailable { .. }) => ErrorKind::TaskResultUnavailable,
            Error::Config { .. } => ErrorKind::Config,
            Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Only an unhealthy dependency trips the breaker. A rejected request
    /// means the service answered.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(self, Error::External(ExternalError::Transient { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ExternalError::from_status(503, "unavailable").is_transient());
        assert!(ExternalError::from_status(429, "quota").is_transient());
        assert!(ExternalError::from_status(408, "timeout").is_transient());
        assert!(!ExternalError::from_status(400, "bad range").is_transient());
        assert!(!ExternalError::from_status(404, "no such sheet").is_transient());
    }

    #[test]
    fn kinds_and_retryability() {
        let transient = Error::from(ExternalError::transient("reset"));
        assert_eq!(transient.kind(), ErrorKind::TransientExternal);
        assert!(transient.is_retryable());
        assert!(transient.counts_as_breaker_failure());

        let permanent = Error::from(ExternalError::permanent("bad request"));
        assert_eq!(permanent.kind(), ErrorKind::PermanentExternal);
        assert!(!permanent.is_retryable());
        assert!(!permanent.counts_as_breaker_failure());

        let open = Error::BreakerOpen {
            target: "sheets".into(),
            retry_after: Duration::from_millis(250),
        };
        assert!(open.is_retryable());
        assert!(!open.counts_as_breaker_failure());

        let missing = Error::from(TaskError::NotFound("t1".into()));
        assert_eq!(missing.kind(), ErrorKind::TaskNotFound);
        assert!(!missing.is_retryable());
    }

    #[test]
    fn error_displays_correctly() {
        let err = Error::from(ExternalError::from_status(429, "Too many requests"));
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));

        let err = Error::BreakerOpen {
            target: "sheets".into(),
            retry_after: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn external_error_serializes_with_type_tag() {
        let json = serde_json::to_string(&ExternalError::permanent("bad")).unwrap();
        assert!(json.contains("\"type\":\"permanent\""));
        assert!(!json.contains("status"));
    }
}
