//! Engagement store contract.
//!
//! The only path to `status`, `is_abandoned` and `last_active_at` is
//! `commit`, which applies a state-machine transition as one conditional
//! write. Episode, switch and distraction logs are append-only.
//!
//! `AppState` holds an `Arc<dyn EngagementStore>`; production uses
//! `PgEngagementStore`, tests use the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::engagement::state_machine::Transition;
use crate::engagement::types::{AbandonmentType, DistractionType};
use crate::models::abandonment::TaskAbandonmentRow;
use crate::models::context_switch::ContextSwitchRow;
use crate::models::distraction::DistractionLogRow;
use crate::models::task::TaskRow;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Applied {
        task: TaskRow,
        /// The episode opened, resumed or closed by this transition, if any.
        episode: Option<TaskAbandonmentRow>,
    },
    /// The row no longer matched the guard: another writer got there first.
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewContextSwitch {
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
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDistraction {
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub focus_session_id: Option<Uuid>,
    pub distraction_type: DistractionType,
    pub duration_seconds: Option<i32>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub time_of_day: NaiveTime,
}

/// Filter for a user's episode listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbandonmentFilter {
    #[serde(rename = "type")]
    pub abandonment_type: Option<AbandonmentType>,
    pub resumed: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
/// Deepest page served; keeps `offset` within `u32`.
pub const MAX_PAGE: u32 = 1_000_000;

impl AbandonmentFilter {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        (self.page() - 1) * self.per_page()
    }
}

/// One page of episodes plus the unpaginated total.
#[derive(Debug, Clone, PartialEq)]
pub struct AbandonmentPage {
    pub items: Vec<TaskAbandonmentRow>,
    pub total: i64,
}

#[async_trait]
pub trait EngagementStore: Send + Sync {
    // Tasks

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRow>, StoreError>;

    /// In-progress, non-abandoned tasks whose `last_active_at` is older than `idle_before`.
    async fn sweep_candidates(&self, idle_before: DateTime<Utc>) -> Result<Vec<TaskRow>, StoreError>;

    /// Tasks of `user_id` currently flagged abandoned, most recently touched first.
    async fn abandoned_tasks(&self, user_id: Uuid) -> Result<Vec<TaskRow>, StoreError>;

    /// Applies `transition` atomically: the guarded task write and its
    /// episode effect both happen, or neither does.
    async fn commit(&self, transition: &Transition) -> Result<CommitOutcome, StoreError>;

    // Abandonment episodes

    async fn open_abandonment(&self, task_id: Uuid) -> Result<Option<TaskAbandonmentRow>, StoreError>;

    /// Every episode of one task, newest first.
    async fn task_abandonments(&self, task_id: Uuid) -> Result<Vec<TaskAbandonmentRow>, StoreError>;

    async fn user_abandonments(
        &self,
        user_id: Uuid,
        filter: &AbandonmentFilter,
    ) -> Result<AbandonmentPage, StoreError>;

    async fn abandonments_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<TaskAbandonmentRow>, StoreError>;

    // Context switches

    async fn append_context_switch(
        &self,
        record: &NewContextSwitch,
    ) -> Result<ContextSwitchRow, StoreError>;

    async fn context_switches_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContextSwitchRow>, StoreError>;

    // Distractions

    /// Appends the event and bumps the task's `distraction_count` in one step.
    async fn append_distraction(
        &self,
        record: &NewDistraction,
    ) -> Result<DistractionLogRow, StoreError>;

    async fn task_distractions(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<DistractionLogRow>, StoreError>;

    async fn distractions_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DistractionLogRow>, StoreError>;
}
