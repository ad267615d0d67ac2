//! Score & state store
//!
//! Single owner of every piece of mutable score data. A round is committed
//! under one write lock: readers either see the state before the round or
//! after it, never a mix.

use std::collections::{BTreeMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::scoring;
use crate::error::StoreError;
use crate::models::{RoundRecord, RoundResults, ServiceDefinition, ServiceState};

/// Point-in-time view of the last committed round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub round_index: Option<u64>,
    pub committed_at: Option<DateTime<Utc>>,
    pub team_score: u64,
    /// Delta of the last committed round
    pub round_score: u64,
    pub round_count: u64,
    pub max_score_per_round: u64,
    pub services: Vec<ServiceState>,
}

struct Ledger {
    services: BTreeMap<String, ServiceState>,
    team_score: u64,
    last_index: Option<u64>,
    round_count: u64,
    commit_faults: u64,
    rounds: VecDeque<Arc<RoundRecord>>,
    snapshot: Arc<Snapshot>,
}

pub struct ScoreStore {
    definitions: Arc<[ServiceDefinition]>,
    max_score_per_round: u64,
    retention: usize,
    ledger: RwLock<Ledger>,
}

impl ScoreStore {
    pub fn new(
        definitions: Arc<[ServiceDefinition]>,
        max_score_per_round: u64,
        retention: usize,
    ) -> Self {
        let services: BTreeMap<String, ServiceState> = definitions
            .iter()
            .map(|d| (d.id.clone(), ServiceState::new(d.id.clone())))
            .collect();

        let snapshot = Arc::new(Snapshot {
            round_index: None,
            committed_at: None,
            team_score: 0,
            round_score: 0,
            round_count: 0,
            max_score_per_round,
            services: ordered_states(&definitions, &services),
        });

        Self {
            definitions,
            max_score_per_round,
            retention: retention.max(1),
            ledger: RwLock::new(Ledger {
                services,
                team_score: 0,
                last_index: None,
                round_count: 0,
                commit_faults: 0,
                rounds: VecDeque::new(),
                snapshot,
            }),
        }
    }

    pub fn definitions(&self) -> &[ServiceDefinition] {
        &self.definitions
    }

    /// Score and commit one round.
    ///
    /// Rounds must arrive in increasing index order; an older or repeated
    /// index is rejected without touching any state. A round that cannot be
    /// scored is still recorded, with zero delta and its fault attached, and
    /// leaves every service state as it was.
    pub fn record_round(&self, results: RoundResults) -> Result<Arc<RoundRecord>, StoreError> {
        let mut ledger = self.ledger.write();

        if let Some(last) = ledger.last_index {
            if results.round_index <= last {
                return Err(StoreError::OutOfOrder { last, got: results.round_index });
            }
        }

        let scored = self.score(&ledger, &results);

        let record = match scored {
            Ok((next_states, score, team_score)) => {
                ledger.services = next_states;
                ledger.team_score = team_score;

                RoundRecord {
                    round_index: results.round_index,
                    started_at: results.started_at,
                    duration_ms: results.duration.as_millis() as u64,
                    outcomes: results.outcomes,
                    awarded: score.awarded,
                    unclamped_total: score.unclamped_total,
                    round_score_delta: score.delta,
                    max_score_per_round: self.max_score_per_round,
                    team_cumulative_score: team_score,
                    fault: None,
                }
            }
            Err(fault) => {
                tracing::error!("Commit fault in round {}: {}", results.round_index, fault);
                ledger.commit_faults += 1;

                RoundRecord {
                    round_index: results.round_index,
                    started_at: results.started_at,
                    duration_ms: results.duration.as_millis() as u64,
                    outcomes: results.outcomes,
                    awarded: BTreeMap::new(),
                    unclamped_total: 0,
                    round_score_delta: 0,
                    max_score_per_round: self.max_score_per_round,
                    team_cumulative_score: ledger.team_score,
                    fault: Some(fault.to_string()),
                }
            }
        };

        let record = Arc::new(record);
        ledger.last_index = Some(record.round_index);
        ledger.round_count += 1;
        ledger.rounds.push_back(record.clone());
        while ledger.rounds.len() > self.retention {
            ledger.rounds.pop_front();
        }

        ledger.snapshot = Arc::new(Snapshot {
            round_index: Some(record.round_index),
            committed_at: Some(Utc::now()),
            team_score: ledger.team_score,
            round_score: record.round_score_delta,
            round_count: ledger.round_count,
            max_score_per_round: self.max_score_per_round,
            services: ordered_states(&self.definitions, &ledger.services),
        });

        Ok(record)
    }

    /// Compute the post-round states without mutating the ledger
    fn score(
        &self,
        ledger: &Ledger,
        results: &RoundResults,
    ) -> Result<(BTreeMap<String, ServiceState>, scoring::RoundScore, u64), StoreError> {
        let score = scoring::score_round(
            results.round_index,
            &self.definitions,
            &results.outcomes,
            self.max_score_per_round,
        )?;

        let mut next = BTreeMap::new();
        for (id, prev) in &ledger.services {
            let outcome = results.outcomes.get(id).ok_or_else(|| StoreError::MissingOutcome {
                round: results.round_index,
                service: id.clone(),
            })?;
            let awarded = score.awarded.get(id).copied().unwrap_or(0);
            next.insert(
                id.clone(),
                scoring::transition(prev, outcome, awarded, results.round_index)?,
            );
        }

        let team_score = ledger
            .team_score
            .checked_add(score.delta)
            .ok_or(StoreError::Overflow(results.round_index))?;

        Ok((next, score, team_score))
    }

    /// Latest committed snapshot. Cheap: the snapshot is built at commit time.
    pub fn current_state(&self) -> Arc<Snapshot> {
        self.ledger.read().snapshot.clone()
    }

    /// Retained rounds whose index falls in `range`, oldest first
    pub fn history(&self, range: RangeInclusive<u64>) -> Vec<Arc<RoundRecord>> {
        let ledger = self.ledger.read();
        let start = ledger.rounds.partition_point(|r| r.round_index < *range.start());
        let end = ledger.rounds.partition_point(|r| r.round_index <= *range.end());

        if start >= end {
            return Vec::new();
        }
        ledger.rounds.range(start..end).cloned().collect()
    }

    pub fn round(&self, index: u64) -> Option<Arc<RoundRecord>> {
        let ledger = self.ledger.read();
        ledger
            .rounds
            .binary_search_by_key(&index, |r| r.round_index)
            .ok()
            .map(|pos| ledger.rounds[pos].clone())
    }

    /// Newest `limit` retained rounds, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Arc<RoundRecord>> {
        let ledger = self.ledger.read();
        let skip = ledger.rounds.len().saturating_sub(limit);
        ledger.rounds.iter().skip(skip).cloned().collect()
    }

    /// Index range currently held in memory
    pub fn retained_range(&self) -> Option<RangeInclusive<u64>> {
        let ledger = self.ledger.read();
        match (ledger.rounds.front(), ledger.rounds.back()) {
            (Some(first), Some(last)) => Some(first.round_index..=last.round_index),
            _ => None,
        }
    }

    pub fn commit_faults(&self) -> u64 {
        self.ledger.read().commit_faults
    }
}

fn ordered_states(
    definitions: &[ServiceDefinition],
    states: &BTreeMap<String, ServiceState>,
) -> Vec<ServiceState> {
    definitions
        .iter()
        .filter_map(|d| states.get(&d.id).cloned())
        .collect()
}
