//! Per-service score state

use serde::{Deserialize, Serialize};

use super::outcome::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Up,
    Down,
}

/// Accumulated state for one service. Only the score store writes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub service_id: String,
    pub status: ServiceStatus,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
    pub cumulative_points: u64,
    pub points_last_round: u64,
    pub total_checks: u64,
    pub up_count: u64,
    /// None until the first round that includes this service commits
    pub last_outcome: Option<ProbeOutcome>,
    pub last_round_index: Option<u64>,
}

impl ServiceState {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            status: ServiceStatus::Down,
            consecutive_successes: 0,
            consecutive_failures: 0,
            cumulative_points: 0,
            points_last_round: 0,
            total_checks: 0,
            up_count: 0,
            last_outcome: None,
            last_round_index: None,
        }
    }

    pub fn uptime_pct(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        let pct = self.up_count as f64 / self.total_checks as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }

    pub fn has_been_checked(&self) -> bool {
        self.last_round_index.is_some()
    }
}
