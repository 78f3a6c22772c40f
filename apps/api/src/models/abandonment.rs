use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One abandonment episode. Append-only: the only later writes are the
/// resume stamp (`resumed`, `resumed_at`) or the close stamp (`closed_at`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TaskAbandonmentRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub focus_session_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub abandoned_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub abandonment_type: String,
    pub inactivity_minutes: Option<i32>,
    pub auto_detected: bool,
    pub reason: Option<String>,
    pub resumed: bool,
    pub resumed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TaskAbandonmentRow {
    /// An episode is open until it is resumed or its task reaches a terminal status.
    pub fn is_open(&self) -> bool {
        !self.resumed && self.closed_at.is_none()
    }

    /// Minutes between detection and resumption, for resumed episodes.
    pub fn minutes_to_resume(&self) -> Option<i64> {
        self.resumed_at
            .filter(|_| self.resumed)
            .map(|at| (at - self.abandoned_at).num_minutes())
    }
}
