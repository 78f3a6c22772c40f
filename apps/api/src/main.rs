mod config;
mod db;
mod engagement;
mod errors;
mod models;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::engagement::clock::{Clock, SystemClock};
use crate::engagement::context_switch::{cost_model_for, ContextSwitchEvaluator};
use crate::engagement::distraction::DistractionLogger;
use crate::engagement::pg_store::PgEngagementStore;
use crate::engagement::policy::EngagementPolicy;
use crate::engagement::service::EngagementService;
use crate::engagement::store::EngagementStore;
use crate::engagement::sweeper::InactivitySweeper;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Engagement API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&db).await?;

    let policy = EngagementPolicy::from_config(&config);
    info!(
        "Engagement policy: timeout {}m, sweep every {}s, switch baseline {}m",
        policy.inactivity_timeout.num_minutes(),
        policy.sweep_interval.as_secs(),
        policy.switch_baseline_cost_minutes
    );

    let store: Arc<dyn EngagementStore> = Arc::new(PgEngagementStore::new(db));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engagement = EngagementService::new(store.clone(), clock.clone());

    // Switch cost model (flat baseline unless SWITCH_COST_PER_DIFFICULTY_STEP is set)
    let costs = cost_model_for(&policy);
    info!("Context-switch cost model: {}", costs.name());
    let switches = ContextSwitchEvaluator::new(store.clone(), costs);
    let distractions = DistractionLogger::new(store.clone(), clock.clone());

    // Background inactivity sweep
    InactivitySweeper::new(store.clone(), engagement.clone(), clock, policy).spawn();

    // Build app state
    let state = AppState {
        store,
        engagement,
        switches,
        distractions,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS once the client origins are known

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
