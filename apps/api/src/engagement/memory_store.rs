//! In-memory `EngagementStore` for tests. One mutex around the whole state
//! gives `commit` the same all-or-nothing, compare-then-write semantics as
//! the guarded `UPDATE` in Postgres.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engagement::clock::Clock;
use crate::engagement::state_machine::{EpisodeEffect, Transition};
use crate::engagement::store::{
    AbandonmentFilter, AbandonmentPage, CommitOutcome, EngagementStore, NewContextSwitch,
    NewDistraction, StoreError,
};
use crate::engagement::types::{EngagementSnapshot, TaskStatus};
use crate::models::abandonment::TaskAbandonmentRow;
use crate::models::context_switch::ContextSwitchRow;
use crate::models::distraction::DistractionLogRow;
use crate::models::task::TaskRow;

#[derive(Default)]
struct Inner {
    tasks: Vec<TaskRow>,
    abandonments: Vec<TaskAbandonmentRow>,
    switches: Vec<ContextSwitchRow>,
    distractions: Vec<DistractionLogRow>,
    /// When set, every call fails as if the database were unreachable.
    offline: bool,
}

/// Row timestamps (`updated_at`, `created_at`) come from `clock`.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    pub fn insert_task(&self, task: TaskRow) {
        self.lock().tasks.push(task);
    }

    pub fn task(&self, task_id: Uuid) -> Option<TaskRow> {
        self.lock().tasks.iter().find(|t| t.id == task_id).cloned()
    }

    pub fn abandonments(&self) -> Vec<TaskAbandonmentRow> {
        self.lock().abandonments.clone()
    }

    pub fn switches(&self) -> Vec<ContextSwitchRow> {
        self.lock().switches.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn online(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        let inner = self.lock();
        if inner.offline {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(inner)
    }
}

fn latest_open(
    abandonments: &mut [TaskAbandonmentRow],
    task_id: Uuid,
) -> Option<&mut TaskAbandonmentRow> {
    abandonments
        .iter_mut()
        .filter(|a| a.task_id == task_id && a.is_open())
        .max_by_key(|a| a.abandoned_at)
}

fn accepts(filter: &AbandonmentFilter, row: &TaskAbandonmentRow) -> bool {
    filter
        .abandonment_type
        .map_or(true, |t| row.abandonment_type == t.as_str())
        && filter.resumed.map_or(true, |r| row.resumed == r)
}

fn newest_first<T, F>(rows: &mut [T], key: F)
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl EngagementStore for InMemoryStore {
    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRow>, StoreError> {
        Ok(self.online()?.tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn sweep_candidates(&self, idle_before: DateTime<Utc>) -> Result<Vec<TaskRow>, StoreError> {
        Ok(self
            .online()?
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::InProgress.as_str()
                    && !t.is_abandoned
                    && t.last_active_at.is_some_and(|at| at < idle_before)
            })
            .cloned()
            .collect())
    }

    async fn abandoned_tasks(&self, user_id: Uuid) -> Result<Vec<TaskRow>, StoreError> {
        let mut rows: Vec<TaskRow> = self
            .online()?
            .tasks
            .iter()
            .filter(|t| t.user_id == user_id && t.is_abandoned)
            .cloned()
            .collect();
        newest_first(&mut rows, |t| t.updated_at);
        Ok(rows)
    }

    async fn commit(&self, transition: &Transition) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.online()?;
        let Inner {
            tasks, abandonments, ..
        } = &mut *inner;

        let Some(task) = tasks.iter_mut().find(|t| t.id == transition.task_id) else {
            return Ok(CommitOutcome::Rejected);
        };
        let current = EngagementSnapshot::try_from(&*task)?;
        if !transition
            .guard
            .matches(current.status, current.is_abandoned, current.last_active_at)
        {
            return Ok(CommitOutcome::Rejected);
        }

        let write = &transition.write;
        let now = self.clock.now();
        if let Some(status) = write.status {
            task.status = status.as_str().to_string();
        }
        if let Some(flag) = write.is_abandoned {
            task.is_abandoned = flag;
        }
        if let Some(at) = write.last_active_at {
            task.last_active_at = Some(task.last_active_at.map_or(at, |prev| prev.max(at)));
        }
        if let Some(at) = write.last_focus_at {
            task.last_focus_at = Some(at);
        }
        task.abandonment_count += write.abandonment_increment;
        task.updated_at = now;
        let task = task.clone();

        let episode = match &transition.episode {
            EpisodeEffect::None => None,
            EpisodeEffect::Open(new) => {
                let row = TaskAbandonmentRow {
                    id: Uuid::new_v4(),
                    user_id: new.user_id,
                    task_id: new.task_id,
                    focus_session_id: new.focus_session_id,
                    started_at: new.started_at,
                    last_active_at: new.last_active_at,
                    abandoned_at: new.abandoned_at,
                    duration_minutes: new.duration_minutes,
                    abandonment_type: new.abandonment_type.as_str().to_string(),
                    inactivity_minutes: new.inactivity_minutes,
                    auto_detected: new.auto_detected,
                    reason: new.reason.clone(),
                    resumed: false,
                    resumed_at: None,
                    closed_at: None,
                    created_at: now,
                };
                abandonments.push(row.clone());
                Some(row)
            }
            EpisodeEffect::Resume { at } => latest_open(abandonments, task.id).map(|episode| {
                episode.resumed = true;
                episode.resumed_at = Some(*at);
                episode.clone()
            }),
            EpisodeEffect::Close { at } => latest_open(abandonments, task.id).map(|episode| {
                episode.closed_at = Some(*at);
                episode.clone()
            }),
        };

        Ok(CommitOutcome::Applied { task, episode })
    }

    async fn open_abandonment(&self, task_id: Uuid) -> Result<Option<TaskAbandonmentRow>, StoreError> {
        Ok(self
            .online()?
            .abandonments
            .iter()
            .filter(|a| a.task_id == task_id && a.is_open())
            .max_by_key(|a| a.abandoned_at)
            .cloned())
    }

    async fn task_abandonments(&self, task_id: Uuid) -> Result<Vec<TaskAbandonmentRow>, StoreError> {
        let mut rows: Vec<_> = self
            .online()?
            .abandonments
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |a| a.abandoned_at);
        Ok(rows)
    }

    async fn user_abandonments(
        &self,
        user_id: Uuid,
        filter: &AbandonmentFilter,
    ) -> Result<AbandonmentPage, StoreError> {
        let mut rows: Vec<_> = self
            .online()?
            .abandonments
            .iter()
            .filter(|a| a.user_id == user_id && accepts(filter, a))
            .cloned()
            .collect();
        newest_first(&mut rows, |a| a.abandoned_at);
        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.per_page() as usize)
            .collect();
        Ok(AbandonmentPage { items, total })
    }

    async fn abandonments_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<TaskAbandonmentRow>, StoreError> {
        Ok(self
            .online()?
            .abandonments
            .iter()
            .filter(|a| a.user_id == user_id && a.abandoned_at >= since)
            .cloned()
            .collect())
    }

    async fn append_context_switch(
        &self,
        record: &NewContextSwitch,
    ) -> Result<ContextSwitchRow, StoreError> {
        let row = ContextSwitchRow {
            id: Uuid::new_v4(),
            user_id: record.user_id,
            from_task_id: record.from_task_id,
            from_category: record.from_category.clone(),
            from_focus_difficulty: record.from_focus_difficulty,
            to_task_id: record.to_task_id,
            to_category: record.to_category.clone(),
            to_focus_difficulty: record.to_focus_difficulty,
            is_significant_switch: record.is_significant_switch,
            estimated_cost_minutes: record.estimated_cost_minutes,
            user_proceeded: record.user_proceeded,
            user_note: record.user_note.clone(),
            created_at: self.clock.now(),
        };
        self.online()?.switches.push(row.clone());
        Ok(row)
    }

    async fn context_switches_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContextSwitchRow>, StoreError> {
        Ok(self
            .online()?
            .switches
            .iter()
            .filter(|s| s.user_id == user_id && s.created_at >= since)
            .cloned()
            .collect())
    }

    async fn append_distraction(
        &self,
        record: &NewDistraction,
    ) -> Result<DistractionLogRow, StoreError> {
        let mut inner = self.online()?;
        let row = DistractionLogRow {
            id: Uuid::new_v4(),
            user_id: record.user_id,
            task_id: record.task_id,
            focus_session_id: record.focus_session_id,
            distraction_type: record.distraction_type.as_str().to_string(),
            duration_seconds: record.duration_seconds,
            notes: record.notes.clone(),
            occurred_at: record.occurred_at,
            time_of_day: record.time_of_day,
        };
        if let Some(task) = inner.tasks.iter_mut().find(|t| t.id == record.task_id) {
            task.distraction_count += 1;
        }
        inner.distractions.push(row.clone());
        Ok(row)
    }

    async fn task_distractions(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<DistractionLogRow>, StoreError> {
        let mut rows: Vec<_> = self
            .online()?
            .distractions
            .iter()
            .filter(|d| d.task_id == task_id && d.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |d| d.occurred_at);
        Ok(rows)
    }

    async fn distractions_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DistractionLogRow>, StoreError> {
        Ok(self
            .online()?
            .distractions
            .iter()
            .filter(|d| d.user_id == user_id && d.occurred_at >= since)
            .cloned()
            .collect())
    }
}
