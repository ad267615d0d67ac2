//! Blue Team Range scoring engine server
//!
//! Runs the round scheduler in the background and serves the scoreboard API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scoring_engine::{
    config::Config,
    create_router,
    db::{self, Journal},
    engine::{Diagnostics, Executor, RoundPipeline, Scheduler, ScoreStore},
    models::ServiceDefinition,
    probes::ProbeRegistry,
    reporting::Reporter,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "scoring_engine=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env().context("invalid configuration")?);

    tracing::info!(
        "Scoring engine starting - Range {} | Network {}.0/24 | Interval {}s",
        config.range_id,
        config.base_net,
        config.check_interval.as_secs()
    );
    tracing::info!(
        "{} services, max {} pts per round",
        config.services.len(),
        config.max_score_per_round
    );

    // Round journal is optional and never read back
    let journal = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await
                .with_context(|| format!("failed to open journal {}", url))?;
            db::run_migrations(&pool).await
                .context("failed to run migrations")?;
            let journal = Journal::new(pool);
            match journal.round_count().await {
                Ok(n) if n > 0 => tracing::info!("Journal holds {} rounds from earlier runs", n),
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not count journal rounds: {}", e),
            }
            Some(journal)
        }
        None => {
            tracing::info!("Round journal disabled");
            None
        }
    };

    // Build engine
    let definitions: Arc<[ServiceDefinition]> = config.services.clone().into();
    let registry = Arc::new(ProbeRegistry::with_defaults());
    tracing::debug!("Probe kinds registered: {:?}", registry.kinds());
    let executor = Executor::new(registry, definitions.clone(), config.max_concurrent_probes);
    let store = Arc::new(ScoreStore::new(
        definitions,
        config.max_score_per_round,
        config.history_retention,
    ));
    let diagnostics = Arc::new(Diagnostics::new());
    let pipeline = Arc::new(RoundPipeline::new(executor, store.clone(), journal));

    let scheduler = Scheduler::new(
        pipeline,
        diagnostics.clone(),
        config.check_interval,
        config.round_deadline(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    // Build application state
    let state = AppState {
        reporter: Reporter::new(store, diagnostics),
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Dashboard API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shutting down scheduler");
    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
