//! Engagement service: the four client operations plus start/close, all
//! funnelled through `state_machine::decide` and `EngagementStore::commit`.
//!
//! Ownership is checked before any state-machine logic runs. Unmet
//! preconditions and lost races resolve to the task's current state; only
//! authorization and store failures surface as errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engagement::clock::Clock;
use crate::engagement::state_machine::{
    decide, AbandonSignal, Decision, EngagementEvent, EpisodeEffect, Transition,
};
use crate::engagement::store::{CommitOutcome, EngagementStore, StoreError};
use crate::engagement::types::{
    AbandonmentType, EngagementSnapshot, EngagementView, TerminalStatus,
};
use crate::errors::AppError;
use crate::models::abandonment::TaskAbandonmentRow;
use crate::models::task::TaskRow;

pub const MAX_REASON_CHARS: usize = 500;

/// Client-declared abandonment.
#[derive(Debug, Clone)]
pub struct AbandonCommand {
    pub kind: AbandonmentType,
    pub reason: Option<String>,
    pub focus_session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AbandonOutcome {
    pub engagement: EngagementView,
    /// The episode this request opened, or the one already open.
    pub abandonment: Option<TaskAbandonmentRow>,
    pub created: bool,
}

#[derive(Clone)]
pub struct EngagementService {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
}

impl EngagementService {
    pub fn new(store: Arc<dyn EngagementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn owned_task(&self, task_id: Uuid, user_id: Uuid) -> Result<TaskRow, AppError> {
        owned_task(self.store.as_ref(), task_id, user_id).await
    }

    pub async fn engagement(&self, task_id: Uuid, user_id: Uuid) -> Result<EngagementView, AppError> {
        let task = self.owned_task(task_id, user_id).await?;
        Ok(view_of(&task)?)
    }

    /// `Heartbeat`: refreshes `last_active_at` of an active task to server
    /// time. Abandoned and idle tasks are left alone; the returned state lets
    /// the client see that it was marked abandoned. `reported_at` is only
    /// used to log client clock skew.
    pub async fn heartbeat(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        reported_at: Option<DateTime<Utc>>,
    ) -> Result<EngagementView, AppError> {
        let task = self.owned_task(task_id, user_id).await?;
        let now = self.now();
        if let Some(at) = reported_at {
            debug!(task_id = %task_id, skew_secs = (now - at).num_seconds(), "Heartbeat clock skew");
        }
        let snapshot = EngagementSnapshot::try_from(&task)?;
        let (task, _) = self
            .apply(&task, decide(&snapshot, EngagementEvent::Heartbeat, now))
            .await?;
        Ok(view_of(&task)?)
    }

    /// Idle → Active for a pending task.
    pub async fn start(&self, task_id: Uuid, user_id: Uuid) -> Result<EngagementView, AppError> {
        let task = self.owned_task(task_id, user_id).await?;
        let snapshot = EngagementSnapshot::try_from(&task)?;
        let (task, applied) = self
            .apply(&task, decide(&snapshot, EngagementEvent::Start, self.now()))
            .await?;
        if applied.is_some() {
            info!(task_id = %task_id, user_id = %user_id, "Task started");
        }
        Ok(view_of(&task)?)
    }

    /// `AbandonTask`: explicit client-declared abandonment.
    pub async fn abandon(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        command: AbandonCommand,
    ) -> Result<AbandonOutcome, AppError> {
        if !command.kind.is_client_reportable() {
            return Err(AppError::Validation(format!(
                "abandonment type '{}' is reserved for inactivity detection",
                command.kind
            )));
        }
        if command
            .reason
            .as_deref()
            .is_some_and(|r| r.chars().count() > MAX_REASON_CHARS)
        {
            return Err(AppError::Validation(format!(
                "reason must be at most {MAX_REASON_CHARS} characters"
            )));
        }

        let task = self.owned_task(task_id, user_id).await?;
        let snapshot = EngagementSnapshot::try_from(&task)?;
        let signal = AbandonSignal {
            kind: command.kind,
            reason: command.reason,
            focus_session_id: command.focus_session_id,
            auto_detected: false,
        };
        let (task, applied) = self
            .apply(&task, decide(&snapshot, EngagementEvent::Abandon(signal), self.now()))
            .await?;

        let (abandonment, created) = match applied {
            Some(Some(episode)) => {
                info!(
                    task_id = %task_id,
                    user_id = %user_id,
                    abandonment_type = %command.kind,
                    duration_minutes = episode.duration_minutes,
                    "Task abandoned by client"
                );
                (Some(episode), true)
            }
            _ => (self.store.open_abandonment(task_id).await?, false),
        };

        Ok(AbandonOutcome {
            engagement: view_of(&task)?,
            abandonment,
            created,
        })
    }

    /// `ResumeTask`: Abandoned → Active. A missing open episode is a store
    /// inconsistency that is logged, never reported to the user.
    pub async fn resume(&self, task_id: Uuid, user_id: Uuid) -> Result<EngagementView, AppError> {
        let task = self.owned_task(task_id, user_id).await?;
        let snapshot = EngagementSnapshot::try_from(&task)?;
        let (task, applied) = self
            .apply(&task, decide(&snapshot, EngagementEvent::Resume, self.now()))
            .await?;
        match applied {
            Some(Some(episode)) => {
                info!(task_id = %task_id, user_id = %user_id, abandonment_id = %episode.id, "Task resumed");
            }
            Some(None) => {
                warn!(task_id = %task_id, "Resumed task had no open abandonment episode");
            }
            None => {}
        }
        Ok(view_of(&task)?)
    }

    /// Any state → Idle. Always legal; closes an open episode without resuming it.
    pub async fn close(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        status: TerminalStatus,
    ) -> Result<EngagementView, AppError> {
        let task = self.owned_task(task_id, user_id).await?;
        let snapshot = EngagementSnapshot::try_from(&task)?;
        let (task, applied) = self
            .apply(&task, decide(&snapshot, EngagementEvent::Close(status), self.now()))
            .await?;
        if let Some(episode) = applied.flatten() {
            info!(task_id = %task_id, abandonment_id = %episode.id, "Open abandonment closed with task");
        }
        Ok(view_of(&task)?)
    }

    /// Sweeper entry point. Returns the opened episode, or `None` when the
    /// task no longer qualifies or another writer won the race.
    pub async fn abandon_inactive(
        &self,
        task: &TaskRow,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskAbandonmentRow>, StoreError> {
        let snapshot = EngagementSnapshot::try_from(task)?;
        let decision = decide(&snapshot, EngagementEvent::Abandon(AbandonSignal::inactivity()), now);
        let Decision::Apply(transition) = decision else {
            return Ok(None);
        };
        match self.store.commit(&transition).await? {
            CommitOutcome::Applied { episode, .. } => Ok(episode),
            CommitOutcome::Rejected => Ok(None),
        }
    }

    /// Commits a decision. Returns the authoritative task row and, when the
    /// transition applied, the episode it touched.
    async fn apply(
        &self,
        task: &TaskRow,
        decision: Decision,
    ) -> Result<(TaskRow, Option<Option<TaskAbandonmentRow>>), AppError> {
        let transition: Transition = match decision {
            Decision::Apply(transition) => transition,
            Decision::Skip(reason) => {
                debug!(task_id = %task.id, ?reason, "No engagement transition");
                return Ok((task.clone(), None));
            }
        };

        match self.store.commit(&transition).await? {
            CommitOutcome::Applied { task, episode } => {
                debug!(
                    task_id = %task.id,
                    from = ?transition.from,
                    to = ?transition.to,
                    "Engagement transition committed"
                );
                if matches!(transition.episode, EpisodeEffect::Open(_)) && episode.is_none() {
                    warn!(task_id = %task.id, "Abandonment committed without an episode row");
                }
                Ok((task, Some(episode)))
            }
            CommitOutcome::Rejected => {
                debug!(task_id = %task.id, "Lost engagement race; returning current state");
                let current = self
                    .store
                    .find_task(task.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task.id)))?;
                Ok((current, None))
            }
        }
    }
}

/// Loads a task and checks it belongs to `user_id`.
pub async fn owned_task(
    store: &dyn EngagementStore,
    task_id: Uuid,
    user_id: Uuid,
) -> Result<TaskRow, AppError> {
    let task = store
        .find_task(task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {task_id} not found")))?;
    if task.user_id != user_id {
        return Err(AppError::Forbidden);
    }
    Ok(task)
}

fn view_of(task: &TaskRow) -> Result<EngagementView, StoreError> {
    Ok(EngagementView::from(&EngagementSnapshot::try_from(task)?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::engagement::clock::ManualClock;
    use crate::engagement::memory_store::InMemoryStore;
    use crate::engagement::types::{EngagementState, TaskStatus};

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 27, 9, 0, 0).unwrap()
    }

    pub(crate) fn make_task(user_id: Uuid, status: TaskStatus, last_active_at: Option<DateTime<Utc>>) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            user_id,
            title: "Read chapter 4".to_string(),
            status: status.as_str().to_string(),
            category: "study".to_string(),
            focus_difficulty: 2,
            deadline: None,
            is_abandoned: false,
            last_active_at,
            last_focus_at: last_active_at,
            abandonment_count: 0,
            distraction_count: 0,
            created_at: t0() - Duration::days(3),
            updated_at: t0() - Duration::days(3),
        }
    }

    pub(crate) struct Fixture {
        pub store: Arc<InMemoryStore>,
        pub clock: Arc<ManualClock>,
        pub service: EngagementService,
        pub user_id: Uuid,
    }

    pub(crate) fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let service = EngagementService::new(store.clone(), clock.clone());
        Fixture {
            store,
            clock,
            service,
            user_id: Uuid::new_v4(),
        }
    }

    impl Fixture {
        pub(crate) fn active_task(&self) -> TaskRow {
            let task = make_task(self.user_id, TaskStatus::InProgress, Some(self.clock.now()));
            self.store.insert_task(task.clone());
            task
        }

        /// Invariant: `is_abandoned` ⇔ exactly one open episode.
        pub(crate) fn assert_episode_invariant(&self, task_id: Uuid) {
            let task = self.store.task(task_id).expect("task exists");
            let open = self
                .store
                .abandonments()
                .iter()
                .filter(|a| a.task_id == task_id && a.is_open())
                .count();
            if task.is_abandoned {
                assert_eq!(open, 1, "abandoned task must have exactly one open episode");
            } else {
                assert_eq!(open, 0, "non-abandoned task must have no open episode");
            }
        }
    }

    fn manual() -> AbandonCommand {
        AbandonCommand {
            kind: AbandonmentType::Manual,
            reason: None,
            focus_session_id: None,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_updates_last_active() {
        let f = fixture();
        let task = f.active_task();
        f.clock.advance(Duration::minutes(3));

        let view = f.service.heartbeat(task.id, f.user_id, None).await.unwrap();
        assert_eq!(view.state, EngagementState::Active);
        assert_eq!(view.last_active_at, Some(t0() + Duration::minutes(3)));
    }

    #[tokio::test]
    async fn test_heartbeat_ignores_lagging_client_clock() {
        let f = fixture();
        let task = f.active_task();
        f.clock.advance(Duration::minutes(5));

        let lagging = Some(t0() - Duration::minutes(20));
        let view = f.service.heartbeat(task.id, f.user_id, lagging).await.unwrap();
        assert_eq!(view.last_active_at, Some(t0() + Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_abandoned_tasks_ordered_by_clock() {
        let f = fixture();
        let first = f.active_task();
        let second = f.active_task();
        f.service.abandon(first.id, f.user_id, manual()).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        f.service.abandon(second.id, f.user_id, manual()).await.unwrap();

        let tasks = f.store.abandoned_tasks(f.user_id).await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(tasks[0].updated_at, t0() + Duration::minutes(5));
        assert_eq!(tasks[1].updated_at, t0());
    }

    #[tokio::test]
    async fn test_heartbeat_for_other_user_is_forbidden() {
        let f = fixture();
        let task = f.active_task();
        let err = f.service.heartbeat(task.id, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden), "got {err:?}");
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_task_is_not_found() {
        let f = fixture();
        let err = f.service.heartbeat(Uuid::new_v4(), f.user_id, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_heartbeat_on_completed_task_is_noop() {
        let f = fixture();
        let task = make_task(f.user_id, TaskStatus::Completed, Some(t0()));
        f.store.insert_task(task.clone());
        f.clock.advance(Duration::minutes(30));

        let view = f.service.heartbeat(task.id, f.user_id, None).await.unwrap();
        assert_eq!(view.state, EngagementState::Idle);
        assert_eq!(view.last_active_at, Some(t0()));
        assert!(f.store.abandonments().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_does_not_clear_abandonment() {
        let f = fixture();
        let task = f.active_task();
        f.service.abandon(task.id, f.user_id, manual()).await.unwrap();
        f.clock.advance(Duration::minutes(1));

        let view = f.service.heartbeat(task.id, f.user_id, None).await.unwrap();
        assert!(view.is_abandoned);
        assert_eq!(view.state, EngagementState::Abandoned);
        f.assert_episode_invariant(task.id);
    }

    #[tokio::test]
    async fn test_abandon_then_resume_scenario() {
        let f = fixture();
        let task = f.active_task();
        f.clock.advance(Duration::minutes(10));

        let outcome = f.service.abandon(task.id, f.user_id, manual()).await.unwrap();
        assert!(outcome.created);
        assert!(outcome.engagement.is_abandoned);
        f.assert_episode_invariant(task.id);

        f.clock.advance(Duration::minutes(5));
        let view = f.service.resume(task.id, f.user_id).await.unwrap();
        assert!(!view.is_abandoned);
        assert_eq!(view.abandonment_count, 1);
        assert_eq!(view.last_active_at, Some(t0() + Duration::minutes(15)));

        let episodes = f.store.abandonments();
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].resumed);
        assert_eq!(episodes[0].resumed_at, Some(t0() + Duration::minutes(15)));
        assert_eq!(episodes[0].abandonment_type, "manual");
        assert!(!episodes[0].auto_detected);
        f.assert_episode_invariant(task.id);
    }

    #[tokio::test]
    async fn test_abandon_twice_returns_existing_episode() {
        let f = fixture();
        let task = f.active_task();
        let first = f.service.abandon(task.id, f.user_id, manual()).await.unwrap();
        let second = f.service.abandon(task.id, f.user_id, manual()).await.unwrap();

        assert!(!second.created);
        assert_eq!(
            second.abandonment.map(|a| a.id),
            first.abandonment.map(|a| a.id)
        );
        assert_eq!(f.store.abandonments().len(), 1);
        assert_eq!(second.engagement.abandonment_count, 1);
    }

    #[tokio::test]
    async fn test_client_cannot_report_long_inactivity() {
        let f = fixture();
        let task = f.active_task();
        let command = AbandonCommand {
            kind: AbandonmentType::LongInactivity,
            ..manual()
        };
        let err = f.service.abandon(task.id, f.user_id, command).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_overlong_reason_is_rejected() {
        let f = fixture();
        let task = f.active_task();
        let command = AbandonCommand {
            reason: Some("x".repeat(MAX_REASON_CHARS + 1)),
            ..manual()
        };
        let err = f.service.abandon(task.id, f.user_id, command).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_resume_closes_only_latest_episode() {
        let f = fixture();
        let task = f.active_task();

        f.service.abandon(task.id, f.user_id, manual()).await.unwrap();
        f.clock.advance(Duration::minutes(2));
        f.service.resume(task.id, f.user_id).await.unwrap();
        let first = f.store.abandonments()[0].clone();

        f.clock.advance(Duration::minutes(20));
        f.service.abandon(task.id, f.user_id, manual()).await.unwrap();
        f.clock.advance(Duration::minutes(2));
        f.service.resume(task.id, f.user_id).await.unwrap();

        let episodes = f.store.abandonments();
        assert_eq!(episodes.len(), 2);
        let earlier = episodes.iter().find(|a| a.id == first.id).unwrap();
        assert_eq!(earlier, &first, "closed episode must not change");
        let latest = episodes.iter().find(|a| a.id != first.id).unwrap();
        assert_eq!(latest.resumed_at, Some(t0() + Duration::minutes(24)));
        assert_eq!(f.store.task(task.id).unwrap().abandonment_count, 2);
    }

    #[tokio::test]
    async fn test_resume_non_abandoned_task_is_noop() {
        let f = fixture();
        let task = f.active_task();
        f.clock.advance(Duration::minutes(4));
        let view = f.service.resume(task.id, f.user_id).await.unwrap();
        assert_eq!(view.state, EngagementState::Active);
        assert_eq!(view.last_active_at, Some(t0()), "no-op must not write");
    }

    #[tokio::test]
    async fn test_resume_without_open_episode_still_clears_flag() {
        let f = fixture();
        let mut task = make_task(f.user_id, TaskStatus::InProgress, Some(t0()));
        task.is_abandoned = true;
        task.abandonment_count = 1;
        f.store.insert_task(task.clone());

        let view = f.service.resume(task.id, f.user_id).await.unwrap();
        assert!(!view.is_abandoned);
        assert_eq!(view.state, EngagementState::Active);
    }

    #[tokio::test]
    async fn test_close_keeps_episode_unresumed() {
        let f = fixture();
        let task = f.active_task();
        f.service.abandon(task.id, f.user_id, manual()).await.unwrap();
        f.clock.advance(Duration::minutes(1));

        let view = f
            .service
            .close(task.id, f.user_id, TerminalStatus::Completed)
            .await
            .unwrap();
        assert_eq!(view.state, EngagementState::Idle);
        assert_eq!(view.status, TaskStatus::Completed);
        assert!(!view.is_abandoned);

        let episode = &f.store.abandonments()[0];
        assert!(!episode.resumed);
        assert_eq!(episode.closed_at, Some(t0() + Duration::minutes(1)));
        f.assert_episode_invariant(task.id);
    }

    #[tokio::test]
    async fn test_start_moves_pending_task_to_active() {
        let f = fixture();
        let task = make_task(f.user_id, TaskStatus::Pending, None);
        f.store.insert_task(task.clone());

        let view = f.service.start(task.id, f.user_id).await.unwrap();
        assert_eq!(view.state, EngagementState::Active);
        assert_eq!(view.last_active_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_error() {
        let f = fixture();
        let task = f.active_task();
        f.store.set_offline(true);
        let err = f.service.heartbeat(task.id, f.user_id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Store(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_inactive_abandon_loses_to_fresh_heartbeat() {
        let f = fixture();
        let stale = f.active_task();
        f.clock.advance(Duration::minutes(20));

        // Heartbeat lands after the sweeper read the row but before it wrote.
        f.service.heartbeat(stale.id, f.user_id, None).await.unwrap();
        let opened = f.service.abandon_inactive(&stale, f.clock.now()).await.unwrap();

        assert!(opened.is_none());
        assert!(!f.store.task(stale.id).unwrap().is_abandoned);
        f.assert_episode_invariant(stale.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_abandons_create_one_episode() {
        for _ in 0..50 {
            let f = fixture();
            let task = f.active_task();
            f.clock.advance(Duration::minutes(20));
            let now = f.clock.now();

            let client = {
                let service = f.service.clone();
                let user_id = f.user_id;
                let task_id = task.id;
                tokio::spawn(async move { service.abandon(task_id, user_id, manual()).await })
            };
            let sweeper = {
                let service = f.service.clone();
                let task = task.clone();
                tokio::spawn(async move { service.abandon_inactive(&task, now).await })
            };

            let client = client.await.unwrap().unwrap();
            let swept = sweeper.await.unwrap().unwrap();

            assert_eq!(f.store.abandonments().len(), 1);
            assert_eq!(f.store.task(task.id).unwrap().abandonment_count, 1);
            assert!(client.created ^ swept.is_some(), "exactly one writer wins");
            f.assert_episode_invariant(task.id);
        }
    }
}
