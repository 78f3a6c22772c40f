use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Immutable context-switch decision. Category and difficulty are snapshots
/// taken at evaluation time, not references to the live task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ContextSwitchRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub from_task_id: Option<Uuid>,
    pub from_category: Option<String>,
    pub from_focus_difficulty: Option<i32>,
    pub to_task_id: Uuid,
    pub to_category: Option<String>,
    pub to_focus_difficulty: Option<i32>,
    pub is_significant_switch: bool,
    pub estimated_cost_minutes: i32,
    pub user_proceeded: bool,
    pub user_note: Option<String>,
    pub created_at: DateTime<Utc>,
}
