//! Service catalog and diagnostics handlers

use axum::{extract::State, Json};

use crate::models::ServiceDefinition;
use crate::reporting::DiagnosticsView;
use crate::AppState;

/// Configured services. Credentials are never serialized with a password.
pub async fn list(State(state): State<AppState>) -> Json<Vec<ServiceDefinition>> {
    Json(state.reporter.definitions().to_vec())
}

pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsView> {
    Json(state.reporter.diagnostics())
}
