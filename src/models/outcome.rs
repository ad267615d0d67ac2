//! Probe outcome model

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeFault};

/// Longest response fragment kept on an outcome
const MAX_DETAIL_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        }
    }
}

/// Result of one probe against one service in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: OutcomeStatus,
    pub latency_ms: u64,
    /// Human readable detail, usually a response fragment
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ProbeFault>,
}

impl ProbeOutcome {
    pub fn pass(message: impl Into<String>, latency: Duration) -> Self {
        Self {
            status: OutcomeStatus::Pass,
            latency_ms: latency.as_millis() as u64,
            message: truncate(message.into()),
            fault: None,
        }
    }

    pub fn from_error(err: &ProbeError, latency: Duration) -> Self {
        let status = if err.is_service_failure() {
            OutcomeStatus::Fail
        } else {
            OutcomeStatus::Error
        };

        Self {
            status,
            latency_ms: latency.as_millis() as u64,
            message: truncate(err.to_string()),
            fault: Some(err.fault()),
        }
    }

    /// Outcome for a probe that was still running when its round ended
    pub fn abandoned(elapsed: Duration) -> Self {
        Self::from_error(&ProbeError::Abandoned, elapsed)
    }

    pub fn from_result(result: Result<String, ProbeError>, latency: Duration) -> Self {
        match result {
            Ok(message) => Self::pass(message, latency),
            Err(err) => Self::from_error(&err, latency),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == OutcomeStatus::Pass
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_DETAIL_LEN {
        let mut cut = MAX_DETAIL_LEN;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_vs_fail_classification() {
        let t = Duration::from_millis(12);

        let refused = ProbeOutcome::from_error(&ProbeError::ConnectionRefused, t);
        assert_eq!(refused.status, OutcomeStatus::Error);
        assert_eq!(refused.fault, Some(ProbeFault::ConnectionRefused));

        let wrong = ProbeOutcome::from_error(&ProbeError::AssertionFailed("HTTP 500".into()), t);
        assert_eq!(wrong.status, OutcomeStatus::Fail);
        assert_eq!(wrong.message, "HTTP 500");

        let abandoned = ProbeOutcome::abandoned(t);
        assert_eq!(abandoned.status, OutcomeStatus::Error);
        assert_eq!(abandoned.fault, Some(ProbeFault::Abandoned));
    }

    #[test]
    fn test_message_truncated_on_char_boundary() {
        let long = "é".repeat(300);
        let outcome = ProbeOutcome::pass(long, Duration::ZERO);
        assert!(outcome.message.len() <= MAX_DETAIL_LEN);
        assert!(outcome.message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_serialized_status_is_uppercase() {
        let outcome = ProbeOutcome::pass("Port open", Duration::from_millis(3));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "PASS");
        assert!(json.get("fault").is_none());
    }
}
