//! Round scheduler
//!
//! Fires on a fixed interval and dispatches at most one round at a time.
//! A tick that lands while the previous round is still in flight is an
//! overrun: it is logged, counted and skipped. Round indices are assigned
//! only on dispatch, so they stay gap-free and strictly increasing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::diagnostics::Diagnostics;
use super::pipeline::RoundPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Dispatched(u64),
    Overrun,
}

pub struct Scheduler {
    pipeline: Arc<RoundPipeline>,
    diagnostics: Arc<Diagnostics>,
    interval: Duration,
    /// How long a round may run before it is cut off
    round_deadline: Duration,
    next_index: u64,
    in_flight: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<RoundPipeline>,
        diagnostics: Arc<Diagnostics>,
        interval: Duration,
        round_deadline: Duration,
    ) -> Self {
        Self {
            pipeline,
            diagnostics,
            interval,
            round_deadline: round_deadline.min(interval),
            next_index: 0,
            in_flight: None,
        }
    }

    fn next_round_at(&self) -> chrono::DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Handle one timer tick
    pub fn tick(&mut self) -> Tick {
        if let Some(handle) = &self.in_flight {
            if !handle.is_finished() {
                tracing::warn!(
                    "Scheduler overrun: round {} still running, skipping tick",
                    self.next_index.saturating_sub(1)
                );
                self.diagnostics.record_overrun(Utc::now(), self.next_round_at());
                return Tick::Overrun;
            }
        }

        let index = self.next_index;
        self.next_index += 1;

        let deadline = Instant::now() + self.round_deadline;
        self.diagnostics.round_started(index, self.next_round_at());

        let pipeline = self.pipeline.clone();
        let diagnostics = self.diagnostics.clone();
        self.in_flight = Some(tokio::spawn(async move {
            if let Err(e) = pipeline.run_round(index, deadline).await {
                tracing::error!("Round {} was not committed: {}", index, e);
            }
            diagnostics.round_finished(index);
        }));

        Tick::Dispatched(index)
    }

    /// Wait for the round in flight, if any
    pub async fn wait_idle(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if let Err(e) = handle.await {
                tracing::error!("Round task failed: {}", e);
            }
        }
    }

    /// Tick until `shutdown` flips. The first round fires immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Scheduler started, interval {}s", self.interval.as_secs());
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        tracing::info!("Scheduler stopping, waiting for round in flight");
        self.wait_idle().await;
    }
}
