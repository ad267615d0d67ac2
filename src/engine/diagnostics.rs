//! Scheduler diagnostics
//!
//! Operational counters written by the scheduler. Kept apart from the score
//! snapshot so that snapshot reads stay identical between rounds.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub is_checking: bool,
    pub in_flight_round: Option<u64>,
    pub next_round_at: Option<DateTime<Utc>>,
    pub overruns: u64,
    pub last_overrun_at: Option<DateTime<Utc>>,
    pub rounds_dispatched: u64,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    inner: Mutex<SchedulerStatus>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_started(&self, round_index: u64, next_round_at: DateTime<Utc>) {
        let mut status = self.inner.lock();
        status.is_checking = true;
        status.in_flight_round = Some(round_index);
        status.next_round_at = Some(next_round_at);
        status.rounds_dispatched += 1;
    }

    pub fn round_finished(&self, round_index: u64) {
        let mut status = self.inner.lock();
        if status.in_flight_round == Some(round_index) {
            status.is_checking = false;
            status.in_flight_round = None;
        }
    }

    pub fn record_overrun(&self, at: DateTime<Utc>, next_round_at: DateTime<Utc>) {
        let mut status = self.inner.lock();
        status.overruns += 1;
        status.last_overrun_at = Some(at);
        status.next_round_at = Some(next_round_at);
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_lifecycle() {
        let diag = Diagnostics::new();
        let now = Utc::now();

        diag.round_started(0, now);
        assert!(diag.status().is_checking);

        // Finishing a stale round must not clear the current one
        diag.round_started(1, now);
        diag.round_finished(0);
        assert_eq!(diag.status().in_flight_round, Some(1));

        diag.round_finished(1);
        let status = diag.status();
        assert!(!status.is_checking);
        assert_eq!(status.rounds_dispatched, 2);
    }

    #[test]
    fn test_overrun_counted() {
        let diag = Diagnostics::new();
        diag.record_overrun(Utc::now(), Utc::now());
        diag.record_overrun(Utc::now(), Utc::now());
        assert_eq!(diag.status().overruns, 2);
        assert!(diag.status().last_overrun_at.is_some());
    }
}
