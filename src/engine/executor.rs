//! Round executor
//!
//! Fans one round out across every service, bounded by a concurrency limit
//! and a hard round deadline. Results are collected in a round-local
//! [`JoinSet`]; when the round ends the set is aborted and dropped, so a
//! straggler can never deliver into another round.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::ProbeError;
use crate::models::{ProbeOutcome, ServiceDefinition};
use crate::probes::{self, ProbeRegistry};

pub struct Executor {
    registry: Arc<ProbeRegistry>,
    definitions: Arc<[ServiceDefinition]>,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(
        registry: Arc<ProbeRegistry>,
        definitions: Arc<[ServiceDefinition]>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            definitions,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn definitions(&self) -> &[ServiceDefinition] {
        &self.definitions
    }

    /// Probe every service once.
    ///
    /// Always returns exactly one outcome per defined service. Probes still
    /// running at `deadline` are cancelled and reported as abandoned.
    pub async fn execute_round(&self, round_index: u64, deadline: Instant) -> BTreeMap<String, ProbeOutcome> {
        let started = Instant::now();
        let mut outcomes = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for def in self.definitions.iter() {
            let Some(probe) = self.registry.get(def.kind()) else {
                let err = ProbeError::Misconfigured(format!("no probe registered for {}", def.kind()));
                outcomes.insert(def.id.clone(), ProbeOutcome::from_error(&err, Duration::ZERO));
                continue;
            };

            let def = def.clone();
            let permits = self.permits.clone();
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let outcome = probes::execute(probe.as_ref(), &def, def.timeout()).await;
                (def.id, outcome)
            });
        }

        let mut abandoned = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    outcomes.insert(id, outcome);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Probe task failed in round {}: {}", round_index, e);
                }
                Ok(None) => break,
                Err(_) => {
                    abandoned = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        // Anything still missing was abandoned at the deadline or panicked
        let elapsed = started.elapsed();
        for def in self.definitions.iter() {
            if outcomes.contains_key(&def.id) {
                continue;
            }
            let outcome = if abandoned {
                tracing::warn!("Round {}: abandoned probe for {}", round_index, def.id);
                ProbeOutcome::abandoned(elapsed)
            } else {
                let err = ProbeError::Misconfigured("probe task panicked".to_string());
                ProbeOutcome::from_error(&err, elapsed)
            };
            outcomes.insert(def.id.clone(), outcome);
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::ProbeFault;
    use crate::models::{CheckKind, CheckSpec, OutcomeStatus};
    use crate::probes::Probe;

    /// Sleeps for the port number in milliseconds, then passes
    struct SleepyProbe;

    #[async_trait]
    impl Probe for SleepyProbe {
        fn kind(&self) -> CheckKind {
            CheckKind::TcpConnect
        }

        async fn check(&self, service: &ServiceDefinition, _: Duration) -> Result<String, ProbeError> {
            tokio::time::sleep(Duration::from_millis(service.port as u64)).await;
            Ok("Port open".to_string())
        }
    }

    fn def(id: &str, sleep_ms: u16, check: CheckSpec) -> ServiceDefinition {
        ServiceDefinition {
            id: id.to_string(),
            name: String::new(),
            machine: String::new(),
            host: "127.0.0.1".to_string(),
            port: sleep_ms,
            weight: 10,
            timeout_secs: Some(30.0),
            check,
        }
    }

    fn executor(defs: Vec<ServiceDefinition>, max_concurrent: usize) -> Executor {
        let mut registry = ProbeRegistry::new();
        registry.register(Arc::new(SleepyProbe));
        Executor::new(Arc::new(registry), defs.into(), max_concurrent)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_complete_before_deadline() {
        let exec = executor(
            vec![def("a", 100, CheckSpec::TcpConnect), def("b", 200, CheckSpec::TcpConnect)],
            8,
        );
        let outcomes = exec.execute_round(0, Instant::now() + Duration::from_secs(5)).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.values().all(|o| o.status == OutcomeStatus::Pass));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_stragglers() {
        let exec = executor(
            vec![def("fast", 100, CheckSpec::TcpConnect), def("slow", 20_000, CheckSpec::TcpConnect)],
            8,
        );
        let outcomes = exec.execute_round(3, Instant::now() + Duration::from_secs(1)).await;

        // Exactly one outcome per service even though the round timed out
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes["fast"].status, OutcomeStatus::Pass);
        assert_eq!(outcomes["slow"].status, OutcomeStatus::Error);
        assert_eq!(outcomes["slow"].fault, Some(ProbeFault::Abandoned));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_serializes_probes() {
        let exec = executor(
            vec![def("a", 1000, CheckSpec::TcpConnect), def("b", 1000, CheckSpec::TcpConnect)],
            1,
        );
        let outcomes = exec.execute_round(0, Instant::now() + Duration::from_millis(1500)).await;

        let passed = outcomes.values().filter(|o| o.is_pass()).count();
        assert_eq!(passed, 1);
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_kind_is_error() {
        let exec = executor(
            vec![def("web", 10, CheckSpec::TcpConnect), def("dns", 10, CheckSpec::DnsZoneTransfer { zone: "ludus.domain".into() })],
            4,
        );
        let outcomes = exec.execute_round(0, Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(outcomes["dns"].status, OutcomeStatus::Error);
        assert_eq!(outcomes["dns"].fault, Some(ProbeFault::Misconfigured));
        assert!(outcomes["web"].is_pass());
    }
}
