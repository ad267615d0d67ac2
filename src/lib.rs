//! Blue Team Range scoring engine
//!
//! Probes every range service on a fixed interval, folds the outcomes into
//! per-service state and a team score, and serves read-only views over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SCORING ENGINE                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌─────────────┐   ┌──────────────────────┐  │
//! │  │ Scheduler │──▶│  Executor   │──▶│  Probe registry      │  │
//! │  │  (tick)   │   │ (JoinSet)   │   │  tcp/http/dns/smb..  │  │
//! │  └───────────┘   └──────┬──────┘   └──────────────────────┘  │
//! │                         ▼                                    │
//! │                  ┌─────────────┐      ┌─────────────┐        │
//! │                  │ Score store │─────▶│ SQLite      │        │
//! │                  │ (one commit)│      │ journal     │        │
//! │                  └──────┬──────┘      └─────────────┘        │
//! │                         ▼                                    │
//! │                  ┌─────────────┐                             │
//! │                  │  Reporter   │◀── axum /api                │
//! │                  └─────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod probes;
pub mod reporting;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reporter: reporting::Reporter,
    pub config: Arc<config::Config>,
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Dashboard routes, same shapes the range scoreboard has always polled
    let dashboard_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/status", get(handlers::status::status))
        .route("/api/history", get(handlers::status::history));

    let api_routes = Router::new()
        .route("/api/v1/snapshot", get(handlers::status::snapshot))
        .route("/api/v1/rounds", get(handlers::rounds::list))
        .route("/api/v1/rounds/:index", get(handlers::rounds::get))
        .route("/api/v1/services", get(handlers::services::list))
        .route("/api/v1/diagnostics", get(handlers::services::diagnostics));

    Router::new()
        .merge(dashboard_routes)
        .merge(api_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
