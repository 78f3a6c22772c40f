//! Axum route handlers for the Engagement API.
//!
//! Caller identity arrives as `user_id` in the body (writes) or the query
//! string (reads); authentication happens upstream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engagement::context_switch::{EvaluateSwitch, SwitchEvaluation};
use crate::engagement::distraction::LogDistraction;
use crate::engagement::service::{AbandonCommand, AbandonOutcome};
use crate::engagement::stats::{
    summarize_abandonments, summarize_distractions, summarize_switches, AbandonmentSummary,
    DistractionAnalytics, PeriodQuery, SwitchAnalytics,
};
use crate::engagement::store::AbandonmentFilter;
use crate::engagement::types::{
    AbandonmentType, DistractionType, EngagementView, TerminalStatus,
};
use crate::errors::AppError;
use crate::models::abandonment::TaskAbandonmentRow;
use crate::models::distraction::DistractionLogRow;
use crate::models::task::TaskRow;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// Bare `user_id`, as a JSON body or a query string.
#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UserPeriodQuery {
    pub user_id: Uuid,
    pub days: Option<u32>,
}

impl UserPeriodQuery {
    fn days(&self) -> u32 {
        PeriodQuery { days: self.days }.days()
    }

    fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days()))
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub user_id: Uuid,
    /// Client-side timestamp of the signal. Only logged; server time is stored.
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AbandonRequest {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub abandonment_type: Option<AbandonmentType>,
    pub reason: Option<String>,
    pub focus_session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub user_id: Uuid,
    pub status: TerminalStatus,
}

#[derive(Debug, Deserialize)]
pub struct AbandonmentListQuery {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub abandonment_type: Option<AbandonmentType>,
    pub resumed: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TaskAbandonmentsResponse {
    pub task_id: Uuid,
    pub abandonments: Vec<TaskAbandonmentRow>,
}

#[derive(Debug, Serialize)]
pub struct AbandonedTasksResponse {
    pub tasks: Vec<TaskRow>,
}

#[derive(Debug, Serialize)]
pub struct AbandonmentListResponse {
    pub items: Vec<TaskAbandonmentRow>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateSwitchRequest {
    pub user_id: Uuid,
    pub from_task_id: Option<Uuid>,
    pub to_task_id: Uuid,
    #[serde(default)]
    pub user_proceeded: bool,
    pub user_note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogDistractionRequest {
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub focus_session_id: Option<Uuid>,
    pub distraction_type: DistractionType,
    pub duration_seconds: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskDistractionsResponse {
    pub task_id: Uuid,
    pub distractions: Vec<DistractionLogRow>,
}

// ────────────────────────────────────────────────────────────────────────────
// Engagement transitions
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/tasks/:id/start
pub async fn handle_start(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UserRequest>,
) -> Result<Json<EngagementView>, AppError> {
    let view = state.engagement.start(task_id, request.user_id).await?;
    Ok(Json(view))
}

/// POST /api/v1/tasks/:id/heartbeat
///
/// Always answers with the task's current state, so a client whose task was
/// abandoned by the sweeper learns it on its next heartbeat.
pub async fn handle_heartbeat(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<EngagementView>, AppError> {
    let view = state
        .engagement
        .heartbeat(task_id, request.user_id, request.reported_at)
        .await?;
    Ok(Json(view))
}

/// POST /api/v1/tasks/:id/abandon
pub async fn handle_abandon(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<AbandonRequest>,
) -> Result<Json<AbandonOutcome>, AppError> {
    let command = AbandonCommand {
        kind: request.abandonment_type.unwrap_or(AbandonmentType::Manual),
        reason: request.reason.filter(|r| !r.trim().is_empty()),
        focus_session_id: request.focus_session_id,
    };
    let outcome = state.engagement.abandon(task_id, request.user_id, command).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/tasks/:id/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UserRequest>,
) -> Result<Json<EngagementView>, AppError> {
    let view = state.engagement.resume(task_id, request.user_id).await?;
    Ok(Json(view))
}

/// POST /api/v1/tasks/:id/close
pub async fn handle_close(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<CloseRequest>,
) -> Result<Json<EngagementView>, AppError> {
    let view = state
        .engagement
        .close(task_id, request.user_id, request.status)
        .await?;
    Ok(Json(view))
}

/// GET /api/v1/tasks/:id/engagement
pub async fn handle_get_engagement(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<UserRequest>,
) -> Result<Json<EngagementView>, AppError> {
    let view = state.engagement.engagement(task_id, query.user_id).await?;
    Ok(Json(view))
}

// ────────────────────────────────────────────────────────────────────────────
// Abandonment history
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/tasks/:id/abandonments
pub async fn handle_task_abandonments(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<UserRequest>,
) -> Result<Json<TaskAbandonmentsResponse>, AppError> {
    state.engagement.owned_task(task_id, query.user_id).await?;
    let abandonments = state.store.task_abandonments(task_id).await?;
    Ok(Json(TaskAbandonmentsResponse {
        task_id,
        abandonments,
    }))
}

/// GET /api/v1/tasks/abandoned
pub async fn handle_abandoned_tasks(
    State(state): State<AppState>,
    Query(query): Query<UserRequest>,
) -> Result<Json<AbandonedTasksResponse>, AppError> {
    let tasks = state.store.abandoned_tasks(query.user_id).await?;
    Ok(Json(AbandonedTasksResponse { tasks }))
}

/// GET /api/v1/abandonments
pub async fn handle_list_abandonments(
    State(state): State<AppState>,
    Query(query): Query<AbandonmentListQuery>,
) -> Result<Json<AbandonmentListResponse>, AppError> {
    let filter = AbandonmentFilter {
        abandonment_type: query.abandonment_type,
        resumed: query.resumed,
        page: query.page,
        per_page: query.per_page,
    };
    let page = state.store.user_abandonments(query.user_id, &filter).await?;
    Ok(Json(AbandonmentListResponse {
        items: page.items,
        total: page.total,
        page: filter.page(),
        per_page: filter.per_page(),
    }))
}

/// GET /api/v1/abandonments/stats
pub async fn handle_abandonment_stats(
    State(state): State<AppState>,
    Query(query): Query<UserPeriodQuery>,
) -> Result<Json<AbandonmentSummary>, AppError> {
    let since = query.since(state.engagement.now());
    let rows = state.store.abandonments_since(query.user_id, since).await?;
    Ok(Json(summarize_abandonments(&rows, query.days())))
}

// ────────────────────────────────────────────────────────────────────────────
// Context switches
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/context-switches
///
/// Evaluates and logs one switch. The caller names the previous task; it
/// is never inferred.
pub async fn handle_evaluate_switch(
    State(state): State<AppState>,
    Json(request): Json<EvaluateSwitchRequest>,
) -> Result<Json<SwitchEvaluation>, AppError> {
    let evaluation = state
        .switches
        .evaluate(EvaluateSwitch {
            user_id: request.user_id,
            from_task_id: request.from_task_id,
            to_task_id: request.to_task_id,
            user_proceeded: request.user_proceeded,
            user_note: request.user_note.filter(|n| !n.trim().is_empty()),
        })
        .await?;
    Ok(Json(evaluation))
}

/// GET /api/v1/context-switches/analytics
pub async fn handle_switch_analytics(
    State(state): State<AppState>,
    Query(query): Query<UserPeriodQuery>,
) -> Result<Json<SwitchAnalytics>, AppError> {
    let since = query.since(state.engagement.now());
    let rows = state.store.context_switches_since(query.user_id, since).await?;
    Ok(Json(summarize_switches(&rows, query.days())))
}

// ────────────────────────────────────────────────────────────────────────────
// Distractions
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/distractions
pub async fn handle_log_distraction(
    State(state): State<AppState>,
    Json(request): Json<LogDistractionRequest>,
) -> Result<(StatusCode, Json<DistractionLogRow>), AppError> {
    let row = state
        .distractions
        .log(LogDistraction {
            user_id: request.user_id,
            task_id: request.task_id,
            focus_session_id: request.focus_session_id,
            distraction_type: request.distraction_type,
            duration_seconds: request.duration_seconds,
            notes: request.notes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/tasks/:id/distractions
pub async fn handle_task_distractions(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<UserRequest>,
) -> Result<Json<TaskDistractionsResponse>, AppError> {
    let distractions = state.distractions.for_task(task_id, query.user_id).await?;
    Ok(Json(TaskDistractionsResponse {
        task_id,
        distractions,
    }))
}

/// GET /api/v1/distractions/analytics
pub async fn handle_distraction_analytics(
    State(state): State<AppState>,
    Query(query): Query<UserPeriodQuery>,
) -> Result<Json<DistractionAnalytics>, AppError> {
    let since = query.since(state.engagement.now());
    let rows = state.store.distractions_since(query.user_id, since).await?;
    Ok(Json(summarize_distractions(&rows, query.days())))
}
