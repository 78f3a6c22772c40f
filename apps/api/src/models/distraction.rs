use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DistractionLogRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub focus_session_id: Option<Uuid>,
    pub distraction_type: String,
    pub duration_seconds: Option<i32>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub time_of_day: NaiveTime,
}
