//! Round record model

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::{OutcomeStatus, ProbeOutcome};

/// Raw output of one executed round, before scoring
#[derive(Debug, Clone)]
pub struct RoundResults {
    pub round_index: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcomes: BTreeMap<String, ProbeOutcome>,
}

/// Immutable history entry for one committed round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_index: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcomes: BTreeMap<String, ProbeOutcome>,
    /// Points credited per service after clamping
    pub awarded: BTreeMap<String, u64>,
    /// Sum of weights for passing services before the cap was applied
    pub unclamped_total: u64,
    pub round_score_delta: u64,
    pub max_score_per_round: u64,
    pub team_cumulative_score: u64,
    /// Set when the round could not be scored; delta is then zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl RoundRecord {
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.values().filter(|o| o.status == status).count()
    }
}
