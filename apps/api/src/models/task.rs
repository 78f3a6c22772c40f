use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The engagement-relevant projection of a task row.
///
/// Title, category, difficulty and deadline are owned by the task CRUD layer
/// and only read here. `status`, `is_abandoned` and `last_active_at` are
/// written exclusively through `EngagementStore::commit`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TaskRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub status: String,
    pub category: String,
    pub focus_difficulty: i32,
    pub deadline: Option<DateTime<Utc>>,
    pub is_abandoned: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub last_focus_at: Option<DateTime<Utc>>,
    pub abandonment_count: i32,
    pub distraction_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
