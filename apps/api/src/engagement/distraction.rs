//! Distraction events: validated, ownership-checked appends to the
//! distraction log. Each append bumps the task's `distraction_count`.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::engagement::clock::Clock;
use crate::engagement::service::owned_task;
use crate::engagement::store::{EngagementStore, NewDistraction};
use crate::engagement::types::DistractionType;
use crate::errors::AppError;
use crate::models::distraction::DistractionLogRow;

pub const MAX_DURATION_SECONDS: i32 = 3600;
pub const MAX_NOTES_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct LogDistraction {
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub focus_session_id: Option<Uuid>,
    pub distraction_type: DistractionType,
    pub duration_seconds: Option<i32>,
    pub notes: Option<String>,
}

impl LogDistraction {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(secs) = self.duration_seconds {
            if !(0..=MAX_DURATION_SECONDS).contains(&secs) {
                return Err(AppError::Validation(format!(
                    "duration_seconds must be between 0 and {MAX_DURATION_SECONDS}"
                )));
            }
        }
        if self
            .notes
            .as_deref()
            .is_some_and(|n| n.chars().count() > MAX_NOTES_CHARS)
        {
            return Err(AppError::Validation(format!(
                "notes must be at most {MAX_NOTES_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct DistractionLogger {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
}

impl DistractionLogger {
    pub fn new(store: Arc<dyn EngagementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn log(&self, request: LogDistraction) -> Result<DistractionLogRow, AppError> {
        request.validate()?;
        owned_task(self.store.as_ref(), request.task_id, request.user_id).await?;

        let occurred_at = self.clock.now();
        let record = NewDistraction {
            user_id: request.user_id,
            task_id: request.task_id,
            focus_session_id: request.focus_session_id,
            distraction_type: request.distraction_type,
            duration_seconds: request.duration_seconds,
            notes: request.notes,
            occurred_at,
            time_of_day: occurred_at.time(),
        };
        let row = self.store.append_distraction(&record).await?;

        info!(
            task_id = %row.task_id,
            user_id = %row.user_id,
            distraction_type = %request.distraction_type,
            "Distraction logged"
        );
        Ok(row)
    }

    /// The caller's distraction events for one task, newest first.
    pub async fn for_task(&self, task_id: Uuid, user_id: Uuid) -> Result<Vec<DistractionLogRow>, AppError> {
        owned_task(self.store.as_ref(), task_id, user_id).await?;
        Ok(self.store.task_distractions(task_id, user_id).await?)
    }
}
