//! Round history handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::models::RoundRecord;
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct RoundRange {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

/// List retained rounds in `from..=to`
pub async fn list(
    State(state): State<AppState>,
    Query(range): Query<RoundRange>,
) -> AppResult<Json<Vec<RoundRecord>>> {
    let from = range.from.unwrap_or(0);
    let to = range.to.unwrap_or(u64::MAX);
    if from > to {
        return Err(AppError::ValidationError("from must not exceed to".to_string()));
    }

    let rounds = state
        .reporter
        .get_history(from, to)
        .iter()
        .map(|r| r.as_ref().clone())
        .collect();

    Ok(Json(rounds))
}

/// Get single round
pub async fn get(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> AppResult<Json<RoundRecord>> {
    let round = state
        .reporter
        .round(index)
        .ok_or_else(|| AppError::NotFound(format!("Round {} not found", index)))?;

    Ok(Json(round.as_ref().clone()))
}
