use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engagement::store::StoreError;
use crate::models::task::TaskRow;

/// Raised when a persisted enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(TaskStatus, "task status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

/// Statuses a task can be closed into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Cancelled,
}

impl From<TerminalStatus> for TaskStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => TaskStatus::Completed,
            TerminalStatus::Cancelled => TaskStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AbandonmentType {
    AppSwitched,
    LongInactivity,
    Manual,
    DeadlinePassed,
}

string_enum!(AbandonmentType, "abandonment type", {
    AppSwitched => "app_switched",
    LongInactivity => "long_inactivity",
    Manual => "manual",
    DeadlinePassed => "deadline_passed",
});

impl AbandonmentType {
    /// Only the inactivity sweeper may classify an episode as `long_inactivity`.
    pub fn is_client_reportable(&self) -> bool {
        !matches!(self, AbandonmentType::LongInactivity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistractionType {
    Phone,
    SocialMedia,
    Noise,
    Person,
    Thoughts,
    HungerThirst,
    Fatigue,
    Other,
}

string_enum!(DistractionType, "distraction type", {
    Phone => "phone",
    SocialMedia => "social_media",
    Noise => "noise",
    Person => "person",
    Thoughts => "thoughts",
    HungerThirst => "hunger_thirst",
    Fatigue => "fatigue",
    Other => "other",
});

/// Per-task tracking state derived from `status` and `is_abandoned`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngagementState {
    Idle,
    Active,
    Abandoned,
}

/// Typed view of the engagement fields of a task row.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementSnapshot {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub status: TaskStatus,
    pub is_abandoned: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub last_focus_at: Option<DateTime<Utc>>,
    pub abandonment_count: i32,
}

impl EngagementSnapshot {
    pub fn state(&self) -> EngagementState {
        match (self.status, self.is_abandoned) {
            (TaskStatus::InProgress, false) => EngagementState::Active,
            (TaskStatus::InProgress, true) => EngagementState::Abandoned,
            _ => EngagementState::Idle,
        }
    }
}

impl TryFrom<&TaskRow> for EngagementSnapshot {
    type Error = StoreError;

    fn try_from(row: &TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(|e| StoreError::Corrupt(format!("task {}: {e}", row.id)))?;
        Ok(EngagementSnapshot {
            task_id: row.id,
            user_id: row.user_id,
            status,
            is_abandoned: row.is_abandoned,
            last_active_at: row.last_active_at,
            last_focus_at: row.last_focus_at,
            abandonment_count: row.abandonment_count,
        })
    }
}

/// What every engagement operation hands back to the client: the task's
/// current true state, after any transition the request caused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagementView {
    pub task_id: Uuid,
    pub state: EngagementState,
    pub status: TaskStatus,
    pub is_abandoned: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub abandonment_count: i32,
}

impl From<&EngagementSnapshot> for EngagementView {
    fn from(snapshot: &EngagementSnapshot) -> Self {
        EngagementView {
            task_id: snapshot.task_id,
            state: snapshot.state(),
            status: snapshot.status,
            is_abandoned: snapshot.is_abandoned,
            last_active_at: snapshot.last_active_at,
            abandonment_count: snapshot.abandonment_count,
        }
    }
}
