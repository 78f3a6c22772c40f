//! Engagement state machine.
//!
//! `decide` is a pure function over (current snapshot, event, now). It never
//! touches the store: it returns either a `Transition` (a guarded write plus
//! its episode side effect) for the caller to commit, or the reason nothing
//! happens. The guard is what makes racing writers safe: the store applies a
//! transition only if the row still matches it, and a rejected commit is a
//! no-op for the loser.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engagement::types::{
    AbandonmentType, EngagementSnapshot, EngagementState, TaskStatus, TerminalStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngagementEvent {
    /// External start trigger for a pending task.
    Start,
    /// Client liveness signal, stamped with server time.
    Heartbeat,
    Abandon(AbandonSignal),
    Resume,
    Close(TerminalStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbandonSignal {
    pub kind: AbandonmentType,
    pub reason: Option<String>,
    pub focus_session_id: Option<Uuid>,
    /// Sweeper detections also pin the observed `last_active_at`, so a
    /// heartbeat landing between the read and the write wins.
    pub auto_detected: bool,
}

impl AbandonSignal {
    pub fn inactivity() -> Self {
        Self {
            kind: AbandonmentType::LongInactivity,
            reason: None,
            focus_session_id: None,
            auto_detected: true,
        }
    }
}

/// Row preconditions for a conditional write. `None` fields are not checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Guard {
    pub status: Option<TaskStatus>,
    pub is_abandoned: Option<bool>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl Guard {
    pub fn matches(&self, status: TaskStatus, is_abandoned: bool, last_active_at: Option<DateTime<Utc>>) -> bool {
        self.status.map_or(true, |s| s == status)
            && self.is_abandoned.map_or(true, |a| a == is_abandoned)
            && self.last_active_at.map_or(true, |t| Some(t) == last_active_at)
    }
}

/// Engagement columns to set. `last_active_at` never moves backwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementWrite {
    pub status: Option<TaskStatus>,
    pub is_abandoned: Option<bool>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub last_focus_at: Option<DateTime<Utc>>,
    pub abandonment_increment: i32,
}

/// Episode fields decided by the state machine; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAbandonment {
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub focus_session_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub abandoned_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub abandonment_type: AbandonmentType,
    pub inactivity_minutes: Option<i32>,
    pub auto_detected: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeEffect {
    None,
    Open(NewAbandonment),
    /// Mark the open episode `resumed = true, resumed_at = at`.
    Resume { at: DateTime<Utc> },
    /// Stamp `closed_at = at` on the open episode, leaving `resumed = false`.
    Close { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub task_id: Uuid,
    pub from: EngagementState,
    pub to: EngagementState,
    pub guard: Guard,
    pub write: EngagementWrite,
    pub episode: EpisodeEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoTransition {
    NotPending,
    NotInProgress,
    AlreadyAbandoned,
    NotAbandoned,
    StaleHeartbeat,
    AlreadyClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Apply(Transition),
    Skip(NoTransition),
}

pub fn decide(snapshot: &EngagementSnapshot, event: EngagementEvent, now: DateTime<Utc>) -> Decision {
    let state = snapshot.state();
    match event {
        EngagementEvent::Start => start(snapshot, now),
        EngagementEvent::Heartbeat => heartbeat(snapshot, state, now),
        EngagementEvent::Abandon(signal) => abandon(snapshot, state, signal, now),
        EngagementEvent::Resume => resume(snapshot, state, now),
        EngagementEvent::Close(terminal) => close(snapshot, state, terminal, now),
    }
}

fn start(snapshot: &EngagementSnapshot, now: DateTime<Utc>) -> Decision {
    if snapshot.status != TaskStatus::Pending {
        return Decision::Skip(NoTransition::NotPending);
    }
    Decision::Apply(Transition {
        task_id: snapshot.task_id,
        from: EngagementState::Idle,
        to: EngagementState::Active,
        guard: Guard {
            status: Some(TaskStatus::Pending),
            ..Guard::default()
        },
        write: EngagementWrite {
            status: Some(TaskStatus::InProgress),
            is_abandoned: Some(false),
            last_active_at: Some(now),
            last_focus_at: Some(now),
            abandonment_increment: 0,
        },
        episode: EpisodeEffect::None,
    })
}

fn heartbeat(snapshot: &EngagementSnapshot, state: EngagementState, now: DateTime<Utc>) -> Decision {
    match state {
        EngagementState::Idle => return Decision::Skip(NoTransition::NotInProgress),
        // Only an explicit resume clears an abandonment.
        EngagementState::Abandoned => return Decision::Skip(NoTransition::AlreadyAbandoned),
        EngagementState::Active => {}
    }

    if snapshot.last_active_at.is_some_and(|prev| now <= prev) {
        return Decision::Skip(NoTransition::StaleHeartbeat);
    }

    Decision::Apply(Transition {
        task_id: snapshot.task_id,
        from: EngagementState::Active,
        to: EngagementState::Active,
        guard: Guard {
            status: Some(TaskStatus::InProgress),
            is_abandoned: Some(false),
            last_active_at: None,
        },
        write: EngagementWrite {
            last_active_at: Some(now),
            ..EngagementWrite::default()
        },
        episode: EpisodeEffect::None,
    })
}

fn abandon(
    snapshot: &EngagementSnapshot,
    state: EngagementState,
    signal: AbandonSignal,
    now: DateTime<Utc>,
) -> Decision {
    match state {
        EngagementState::Idle => return Decision::Skip(NoTransition::NotInProgress),
        EngagementState::Abandoned => return Decision::Skip(NoTransition::AlreadyAbandoned),
        EngagementState::Active => {}
    }

    let last_active_at = snapshot.last_active_at.unwrap_or(now).min(now);
    // The active window opens at the last start/resume; creation time is never used.
    let started_at = snapshot
        .last_focus_at
        .unwrap_or(last_active_at)
        .min(last_active_at);
    // A detected episode stops counting work at the last heartbeat.
    let active_until = if signal.auto_detected { last_active_at } else { now };
    let duration_minutes = whole_minutes(active_until - started_at);
    let inactivity_minutes = whole_minutes(now - last_active_at);

    let guard = Guard {
        status: Some(TaskStatus::InProgress),
        is_abandoned: Some(false),
        last_active_at: if signal.auto_detected {
            snapshot.last_active_at
        } else {
            None
        },
    };

    Decision::Apply(Transition {
        task_id: snapshot.task_id,
        from: EngagementState::Active,
        to: EngagementState::Abandoned,
        guard,
        write: EngagementWrite {
            is_abandoned: Some(true),
            abandonment_increment: 1,
            ..EngagementWrite::default()
        },
        episode: EpisodeEffect::Open(NewAbandonment {
            user_id: snapshot.user_id,
            task_id: snapshot.task_id,
            focus_session_id: signal.focus_session_id,
            started_at,
            last_active_at,
            abandoned_at: now,
            duration_minutes,
            abandonment_type: signal.kind,
            inactivity_minutes: Some(inactivity_minutes),
            auto_detected: signal.auto_detected,
            reason: signal.reason,
        }),
    })
}

fn resume(snapshot: &EngagementSnapshot, state: EngagementState, now: DateTime<Utc>) -> Decision {
    if !snapshot.is_abandoned {
        return Decision::Skip(NoTransition::NotAbandoned);
    }
    Decision::Apply(Transition {
        task_id: snapshot.task_id,
        from: state,
        to: EngagementState::Active,
        guard: Guard {
            is_abandoned: Some(true),
            ..Guard::default()
        },
        write: EngagementWrite {
            status: Some(TaskStatus::InProgress),
            is_abandoned: Some(false),
            last_active_at: Some(now),
            last_focus_at: Some(now),
            abandonment_increment: 0,
        },
        episode: EpisodeEffect::Resume { at: now },
    })
}

fn close(
    snapshot: &EngagementSnapshot,
    state: EngagementState,
    terminal: TerminalStatus,
    now: DateTime<Utc>,
) -> Decision {
    let target = TaskStatus::from(terminal);
    if snapshot.status == target && !snapshot.is_abandoned {
        return Decision::Skip(NoTransition::AlreadyClosed);
    }
    Decision::Apply(Transition {
        task_id: snapshot.task_id,
        from: state,
        to: EngagementState::Idle,
        guard: Guard::default(),
        write: EngagementWrite {
            status: Some(target),
            is_abandoned: Some(false),
            ..EngagementWrite::default()
        },
        episode: EpisodeEffect::Close { at: now },
    })
}

fn whole_minutes(span: chrono::Duration) -> i32 {
    span.num_minutes().clamp(0, i32::MAX as i64) as i32
}
