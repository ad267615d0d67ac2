//! Scoreboard handlers

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Snapshot;
use crate::models::ServiceStatus;
use crate::reporting::ScorePoint;
use crate::{AppResult, AppError, AppState};

/// Chart length when `limit` is not given
const DEFAULT_HISTORY_LIMIT: usize = 30;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Serialize)]
pub struct ServiceView {
    pub name: String,
    pub machine: String,
    pub host: String,
    pub port: u16,
    pub points_per_round: u64,
    /// None until the service has been checked once
    pub up: Option<bool>,
    pub points_earned: u64,
    pub message: String,
    pub total_points: u64,
    pub total_checks: u64,
    pub uptime_pct: f64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub last_check_time: Option<DateTime<Utc>>,
    pub next_check_in: Option<i64>,
    pub is_checking: bool,
    pub round_score: u64,
    pub max_score_per_round: u64,
    pub cumulative_score: u64,
    pub round_count: u64,
    pub check_interval: u64,
    pub range_id: u32,
    pub base_net: String,
    pub services: BTreeMap<String, ServiceView>,
}

/// Dashboard status: the committed snapshot joined with service metadata
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.reporter.get_snapshot();
    let diagnostics = state.reporter.diagnostics();

    let services = state
        .reporter
        .definitions()
        .iter()
        .zip(snapshot.services.iter())
        .map(|(def, svc)| {
            let message = svc
                .last_outcome
                .as_ref()
                .map(|o| o.message.clone())
                .unwrap_or_else(|| "No checks run yet".to_string());

            let view = ServiceView {
                name: def.display_name().to_string(),
                machine: def.machine.clone(),
                host: def.host.clone(),
                port: def.port,
                points_per_round: def.weight,
                up: svc.has_been_checked().then_some(svc.status == ServiceStatus::Up),
                points_earned: svc.points_last_round,
                message,
                total_points: svc.cumulative_points,
                total_checks: svc.total_checks,
                uptime_pct: svc.uptime_pct(),
                consecutive_successes: svc.consecutive_successes,
                consecutive_failures: svc.consecutive_failures,
            };
            (def.id.clone(), view)
        })
        .collect();

    Json(StatusResponse {
        last_check_time: snapshot.committed_at,
        next_check_in: diagnostics.seconds_until_next_round,
        is_checking: diagnostics.scheduler.is_checking,
        round_score: snapshot.round_score,
        max_score_per_round: snapshot.max_score_per_round,
        cumulative_score: snapshot.team_score,
        round_count: snapshot.round_count,
        check_interval: state.config.check_interval.as_secs(),
        range_id: state.config.range_id,
        base_net: state.config.base_net.clone(),
        services,
    })
}

/// Raw committed snapshot
pub async fn snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.reporter.get_snapshot().as_ref().clone())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Score per round for charting, oldest first
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<ScorePoint>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit == 0 || limit > MAX_HISTORY_LIMIT {
        return Err(AppError::ValidationError(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }

    Ok(Json(state.reporter.score_series(limit)))
}
