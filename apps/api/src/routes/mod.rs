pub mod health;

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;

use crate::engagement::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));

    Router::new()
        .route("/health", get(health::health_handler))
        // Engagement transitions
        .route("/api/v1/tasks/:id/start", post(handlers::handle_start))
        .route("/api/v1/tasks/:id/heartbeat", post(handlers::handle_heartbeat))
        .route("/api/v1/tasks/:id/abandon", post(handlers::handle_abandon))
        .route("/api/v1/tasks/:id/resume", post(handlers::handle_resume))
        .route("/api/v1/tasks/:id/close", post(handlers::handle_close))
        .route(
            "/api/v1/tasks/:id/engagement",
            get(handlers::handle_get_engagement),
        )
        // Abandonment history
        .route(
            "/api/v1/tasks/:id/abandonments",
            get(handlers::handle_task_abandonments),
        )
        .route("/api/v1/tasks/abandoned", get(handlers::handle_abandoned_tasks))
        .route("/api/v1/abandonments", get(handlers::handle_list_abandonments))
        .route(
            "/api/v1/abandonments/stats",
            get(handlers::handle_abandonment_stats),
        )
        // Context switches
        .route(
            "/api/v1/context-switches",
            post(handlers::handle_evaluate_switch),
        )
        .route(
            "/api/v1/context-switches/analytics",
            get(handlers::handle_switch_analytics),
        )
        // Distractions
        .route("/api/v1/distractions", post(handlers::handle_log_distraction))
        .route(
            "/api/v1/tasks/:id/distractions",
            get(handlers::handle_task_distractions),
        )
        .route(
            "/api/v1/distractions/analytics",
            get(handlers::handle_distraction_analytics),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
