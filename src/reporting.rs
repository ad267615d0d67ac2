//! Read-only views over the score store
//!
//! Nothing here can mutate scoring state. Every view is taken from a single
//! committed round.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{Diagnostics, SchedulerStatus, ScoreStore, Snapshot};
use crate::models::{RoundRecord, ServiceDefinition};

#[derive(Clone)]
pub struct Reporter {
    store: Arc<ScoreStore>,
    diagnostics: Arc<Diagnostics>,
}

/// One point of the score chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorePoint {
    pub round_index: u64,
    pub timestamp: DateTime<Utc>,
    pub round_score: u64,
    pub max_score: u64,
    pub cumulative_score: u64,
    pub faulted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsView {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub seconds_until_next_round: Option<i64>,
    pub commit_faults: u64,
    pub retained_from: Option<u64>,
    pub retained_to: Option<u64>,
}

impl Reporter {
    pub fn new(store: Arc<ScoreStore>, diagnostics: Arc<Diagnostics>) -> Self {
        Self { store, diagnostics }
    }

    /// Latest committed state. Identical across calls until the next commit.
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.store.current_state()
    }

    /// Rounds `from..=to` that are still retained, oldest first
    pub fn get_history(&self, from: u64, to: u64) -> HistoryView {
        HistoryView { store: self.store.clone(), range: from..=to }
    }

    pub fn round(&self, index: u64) -> Option<Arc<RoundRecord>> {
        self.store.round(index)
    }

    /// Newest `limit` rounds as chart points, oldest first
    pub fn score_series(&self, limit: usize) -> Vec<ScorePoint> {
        self.store
            .recent(limit)
            .iter()
            .map(|r| ScorePoint {
                round_index: r.round_index,
                timestamp: r.started_at,
                round_score: r.round_score_delta,
                max_score: r.max_score_per_round,
                cumulative_score: r.team_cumulative_score,
                faulted: r.is_faulted(),
            })
            .collect()
    }

    pub fn diagnostics(&self) -> DiagnosticsView {
        let scheduler = self.diagnostics.status();
        let seconds_until_next_round = scheduler
            .next_round_at
            .map(|at| (at - Utc::now()).num_seconds().max(0));
        let retained = self.store.retained_range();

        DiagnosticsView {
            scheduler,
            seconds_until_next_round,
            commit_faults: self.store.commit_faults(),
            retained_from: retained.as_ref().map(|r| *r.start()),
            retained_to: retained.as_ref().map(|r| *r.end()),
        }
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.diagnostics.status()
    }

    pub fn definitions(&self) -> &[ServiceDefinition] {
        self.store.definitions()
    }
}

/// Lazy history query. Each [`HistoryView::iter`] starts over against the
/// current retention window.
#[derive(Clone)]
pub struct HistoryView {
    store: Arc<ScoreStore>,
    range: RangeInclusive<u64>,
}

impl HistoryView {
    pub fn iter(&self) -> HistoryIter {
        // Clamp to what is retained so the walk is always finite
        let window = self.store.retained_range().and_then(|retained| {
            let start = (*self.range.start()).max(*retained.start());
            let end = (*self.range.end()).min(*retained.end());
            (start <= end).then_some((start, end))
        });

        HistoryIter { store: self.store.clone(), window }
    }
}

impl IntoIterator for &HistoryView {
    type Item = Arc<RoundRecord>;
    type IntoIter = HistoryIter;

    fn into_iter(self) -> HistoryIter {
        self.iter()
    }
}

pub struct HistoryIter {
    store: Arc<ScoreStore>,
    /// Next index to yield and last index, inclusive
    window: Option<(u64, u64)>,
}

impl Iterator for HistoryIter {
    type Item = Arc<RoundRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((next, end)) = self.window {
            self.window = if next < end { Some((next + 1, end)) } else { None };
            // Evicted while iterating
            if let Some(record) = self.store.round(next) {
                return Some(record);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use crate::models::{CheckSpec, ProbeOutcome, RoundResults};

    fn store(retention: usize) -> Arc<ScoreStore> {
        let defs: Arc<[ServiceDefinition]> = vec![ServiceDefinition {
            id: "web".to_string(),
            name: "HTTP Web Server".to_string(),
            machine: "WEB01".to_string(),
            host: "10.10.10.31".to_string(),
            port: 80,
            weight: 100,
            timeout_secs: None,
            check: CheckSpec::TcpConnect,
        }]
        .into();
        Arc::new(ScoreStore::new(defs, 100, retention))
    }

    fn commit(store: &ScoreStore, index: u64) {
        let mut outcomes = BTreeMap::new();
        outcomes.insert("web".to_string(), ProbeOutcome::pass("Port open", Duration::from_millis(3)));
        store
            .record_round(RoundResults {
                round_index: index,
                started_at: Utc::now(),
                duration: Duration::from_millis(5),
                outcomes,
            })
            .unwrap();
    }

    fn reporter(store: Arc<ScoreStore>) -> Reporter {
        Reporter::new(store, Arc::new(Diagnostics::new()))
    }

    #[test]
    fn test_snapshot_is_idempotent_between_rounds() {
        let store = store(10);
        commit(&store, 0);
        let reporter = reporter(store.clone());

        let a = reporter.get_snapshot();
        let b = reporter.get_snapshot();
        assert_eq!(a, b);

        commit(&store, 1);
        assert_eq!(reporter.get_snapshot().team_score, 200);
    }

    #[test]
    fn test_history_is_lazy_and_restartable() {
        let store = store(10);
        for i in 0..5 {
            commit(&store, i);
        }
        let reporter = reporter(store.clone());

        let view = reporter.get_history(1, 3);
        let first: Vec<u64> = view.iter().map(|r| r.round_index).collect();
        let again: Vec<u64> = view.iter().map(|r| r.round_index).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(first, again);

        // A restarted walk sees newly committed rounds in range
        let open = reporter.get_history(3, u64::MAX);
        assert_eq!(open.iter().count(), 2);
        commit(&store, 5);
        assert_eq!(open.iter().count(), 3);
    }

    #[test]
    fn test_history_bounded_by_retention() {
        let store = store(3);
        for i in 0..6 {
            commit(&store, i);
        }
        let reporter = reporter(store);

        let indices: Vec<u64> = reporter.get_history(0, 100).iter().map(|r| r.round_index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        assert_eq!(reporter.get_history(5, 2).iter().count(), 0);
    }

    #[test]
    fn test_score_series_and_diagnostics() {
        let store = store(10);
        for i in 0..4 {
            commit(&store, i);
        }
        let reporter = reporter(store);

        let series = reporter.score_series(2);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].round_index, 2);
        assert_eq!(series[1].cumulative_score, 400);

        let diag = reporter.diagnostics();
        assert_eq!(diag.commit_faults, 0);
        assert_eq!(diag.retained_from, Some(0));
        assert_eq!(diag.retained_to, Some(3));
        assert!(!diag.scheduler.is_checking);
    }
}
