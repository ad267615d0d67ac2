//! One round, end to end: execute, commit, log, journal.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;

use super::executor::Executor;
use super::store::ScoreStore;
use crate::db::Journal;
use crate::error::StoreError;
use crate::models::{OutcomeStatus, RoundRecord, RoundResults};

/// Longest outcome message written to the round log
const LOG_MESSAGE_LEN: usize = 70;

pub struct RoundPipeline {
    executor: Executor,
    store: Arc<ScoreStore>,
    journal: Option<Journal>,
}

impl RoundPipeline {
    pub fn new(executor: Executor, store: Arc<ScoreStore>, journal: Option<Journal>) -> Self {
        Self { executor, store, journal }
    }

    pub async fn run_round(&self, round_index: u64, deadline: Instant) -> Result<Arc<RoundRecord>, StoreError> {
        tracing::info!("=== Starting check round {} ===", round_index);
        let started_at = Utc::now();
        let started = Instant::now();

        let outcomes = self.executor.execute_round(round_index, deadline).await;
        let record = self.store.record_round(RoundResults {
            round_index,
            started_at,
            duration: started.elapsed(),
            outcomes,
        })?;

        self.log_round(&record);

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record).await {
                tracing::warn!("Failed to journal round {}: {}", round_index, e);
            }
        }

        Ok(record)
    }

    fn log_round(&self, record: &RoundRecord) {
        for def in self.executor.definitions() {
            let Some(outcome) = record.outcomes.get(&def.id) else {
                continue;
            };
            let points = record.awarded.get(&def.id).copied().unwrap_or(0);
            let message = truncate(&outcome.message, LOG_MESSAGE_LEN);
            let state = if outcome.is_pass() { "UP" } else { "DOWN" };

            match outcome.status {
                OutcomeStatus::Error => tracing::warn!(
                    "  {:<4}  {:<30}  +{:<3} pts  {}",
                    state, def.display_name(), points, message
                ),
                _ => tracing::info!(
                    "  {:<4}  {:<30}  +{:<3} pts  {}",
                    state, def.display_name(), points, message
                ),
            }
        }

        if let Some(fault) = &record.fault {
            tracing::error!("Round {} scored zero: {}", record.round_index, fault);
        }
        tracing::info!(
            "Round {} complete: {}/{} pts  |  cumulative: {}",
            record.round_index,
            record.round_score_delta,
            record.max_score_per_round,
            record.team_cumulative_score
        );
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::error::ProbeError;
    use crate::models::{CheckKind, CheckSpec, ServiceDefinition, ServiceStatus};
    use crate::probes::{Probe, ProbeRegistry};

    /// Passes iff the port is even
    struct EvenPortProbe;

    #[async_trait]
    impl Probe for EvenPortProbe {
        fn kind(&self) -> CheckKind {
            CheckKind::TcpConnect
        }

        async fn check(&self, service: &ServiceDefinition, _: Duration) -> Result<String, ProbeError> {
            if service.port % 2 == 0 {
                Ok("Port open".to_string())
            } else {
                Err(ProbeError::ConnectionRefused)
            }
        }
    }

    fn pipeline(ports_weights: &[(u16, u64)], cap: u64) -> RoundPipeline {
        let defs: Arc<[ServiceDefinition]> = ports_weights
            .iter()
            .enumerate()
            .map(|(i, (port, weight))| ServiceDefinition {
                id: format!("svc{}", i),
                name: String::new(),
                machine: String::new(),
                host: "127.0.0.1".to_string(),
                port: *port,
                weight: *weight,
                timeout_secs: Some(1.0),
                check: CheckSpec::TcpConnect,
            })
            .collect();

        let mut registry = ProbeRegistry::new();
        registry.register(Arc::new(EvenPortProbe));
        let executor = Executor::new(Arc::new(registry), defs.clone(), 4);
        let store = Arc::new(ScoreStore::new(defs, cap, 100));
        RoundPipeline::new(executor, store, None)
    }

    #[tokio::test]
    async fn test_round_commits_and_scores() {
        let pipeline = pipeline(&[(2, 10), (4, 20), (6, 70)], 100);
        let record = pipeline.run_round(0, Instant::now() + Duration::from_secs(5)).await.unwrap();
        assert_eq!(record.round_score_delta, 100);

        let snapshot = pipeline.store.current_state();
        assert_eq!(snapshot.team_score, 100);
        assert!(snapshot.services.iter().all(|s| s.status == ServiceStatus::Up));
    }

    #[tokio::test]
    async fn test_down_service_scores_nothing() {
        let pipeline = pipeline(&[(2, 50), (3, 50)], 100);
        let record = pipeline.run_round(0, Instant::now() + Duration::from_secs(5)).await.unwrap();
        assert_eq!(record.round_score_delta, 50);
        assert_eq!(record.count(OutcomeStatus::Error), 1);

        let second = pipeline.run_round(1, Instant::now() + Duration::from_secs(5)).await.unwrap();
        assert_eq!(second.team_cumulative_score, 100);
    }

    #[tokio::test]
    async fn test_replayed_index_is_rejected() {
        let pipeline = pipeline(&[(2, 10)], 10);
        pipeline.run_round(0, Instant::now() + Duration::from_secs(5)).await.unwrap();
        let err = pipeline.run_round(0, Instant::now() + Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, StoreError::OutOfOrder { last: 0, got: 0 });
    }

    #[tokio::test]
    async fn test_rounds_reach_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("scores.db").display());
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let journal = Journal::new(pool);

        let base = pipeline(&[(2, 10)], 10);
        let pipeline = RoundPipeline::new(base.executor, base.store, Some(journal.clone()));
        pipeline.run_round(0, Instant::now() + Duration::from_secs(5)).await.unwrap();
        pipeline.run_round(1, Instant::now() + Duration::from_secs(5)).await.unwrap();

        assert_eq!(journal.round_count().await.unwrap(), 2);
    }
}
