//! Error handling

use std::time::Duration;

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the reporting API
#[derive(Debug)]
pub enum AppError {
    // Resource errors
    NotFound(String),

    // Validation errors
    ValidationError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

// ============================================================================
// PROBE FAULTS
// ============================================================================

/// Why a probe did not pass.
///
/// Every variant is recovered inside the executor into a FAIL or ERROR
/// outcome; none of them ever propagates past a round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Connected, but the reply never completed
    #[error("no response within {}ms", .0.as_millis())]
    ResponseTimeout(Duration),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected response: {0}")]
    ProtocolMismatch(String),

    #[error("{0}")]
    AssertionFailed(String),

    #[error("misconfigured check: {0}")]
    Misconfigured(String),

    #[error("abandoned at round deadline")]
    Abandoned,
}

/// Serializable classification of a [`ProbeError`], kept on the outcome for
/// operator diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFault {
    Timeout,
    ConnectionRefused,
    Unreachable,
    ProtocolMismatch,
    AssertionFailed,
    Misconfigured,
    Abandoned,
}

impl ProbeError {
    pub fn fault(&self) -> ProbeFault {
        match self {
            ProbeError::Timeout(_) | ProbeError::ResponseTimeout(_) => ProbeFault::Timeout,
            ProbeError::ConnectionRefused => ProbeFault::ConnectionRefused,
            ProbeError::Unreachable(_) => ProbeFault::Unreachable,
            ProbeError::ProtocolMismatch(_) => ProbeFault::ProtocolMismatch,
            ProbeError::AssertionFailed(_) => ProbeFault::AssertionFailed,
            ProbeError::Misconfigured(_) => ProbeFault::Misconfigured,
            ProbeError::Abandoned => ProbeFault::Abandoned,
        }
    }

    /// Faults where the service answered but answered wrong.
    ///
    /// Everything else means we never got a usable conversation and is
    /// scored as ERROR.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            ProbeError::ProtocolMismatch(_)
                | ProbeError::AssertionFailed(_)
                | ProbeError::ResponseTimeout(_)
        )
    }

    /// Map an I/O error from connect/read/write into the probe taxonomy
    pub fn from_io(err: std::io::Error, timeout: Duration) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionRefused => ProbeError::ConnectionRefused,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ProbeError::Timeout(timeout),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                ProbeError::ProtocolMismatch(format!("connection closed: {}", err))
            }
            _ => ProbeError::Unreachable(err.to_string()),
        }
    }
}

// ============================================================================
// STORE / CONFIG
// ============================================================================

/// Internal scoring faults. The only error class that reaches readers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("round {got} is not newer than committed round {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("round {round} has no outcome for service '{service}'")]
    MissingOutcome { round: u64, service: String },

    #[error("round {round} carries outcome for unknown service '{service}'")]
    UnknownService { round: u64, service: String },

    #[error("score overflow while committing round {0}")]
    Overflow(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to read services file {path}: {source}")]
    ServicesFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse services file: {0}")]
    ServicesParse(#[from] serde_json::Error),

    #[error("invalid service '{id}': {reason}")]
    InvalidService { id: String, reason: String },

    #[error("no services configured")]
    NoServices,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_errors_map_to_taxonomy() {
        let t = Duration::from_secs(5);

        let refused = ProbeError::from_io(io::Error::from(io::ErrorKind::ConnectionRefused), t);
        assert_eq!(refused, ProbeError::ConnectionRefused);
        assert!(!refused.is_service_failure());

        let timed_out = ProbeError::from_io(io::Error::from(io::ErrorKind::TimedOut), t);
        assert_eq!(timed_out.fault(), ProbeFault::Timeout);

        let eof = ProbeError::from_io(io::Error::from(io::ErrorKind::UnexpectedEof), t);
        assert!(eof.is_service_failure());
    }

    #[test]
    fn test_response_timeout_is_service_failure() {
        let err = ProbeError::ResponseTimeout(Duration::from_millis(450));
        assert!(err.is_service_failure());
        assert_eq!(err.fault(), ProbeFault::Timeout);
        assert!(!ProbeError::Timeout(Duration::from_millis(450)).is_service_failure());
    }

    #[test]
    fn test_timeout_display() {
        let err = ProbeError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1500ms");
    }
}
