//! Inactivity sweeper.
//!
//! Periodically abandons in-progress tasks whose last heartbeat is older
//! than the inactivity timeout. Each detection goes through the same
//! conditional write as a client abandon, so a task that is abandoned by
//! the client, resumed, or heartbeated while the sweep runs is left alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engagement::clock::Clock;
use crate::engagement::policy::EngagementPolicy;
use crate::engagement::service::EngagementService;
use crate::engagement::store::{EngagementStore, StoreError};
use crate::models::task::TaskRow;

/// Counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub abandoned: usize,
    /// Candidates another writer changed before our write landed.
    pub lost_races: usize,
    /// Candidates that failed or timed out; retried next pass.
    pub deferred: usize,
}

pub struct InactivitySweeper {
    store: Arc<dyn EngagementStore>,
    service: EngagementService,
    clock: Arc<dyn Clock>,
    policy: EngagementPolicy,
}

impl InactivitySweeper {
    pub fn new(
        store: Arc<dyn EngagementStore>,
        service: EngagementService,
        clock: Arc<dyn Clock>,
        policy: EngagementPolicy,
    ) -> Self {
        Self {
            store,
            service,
            clock,
            policy,
        }
    }

    /// One pass over every candidate. Only a failure to list candidates is
    /// an error; per-task failures are counted and left for the next pass.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let idle_before = now - self.policy.inactivity_timeout;
        let candidates = self.store.sweep_candidates(idle_before).await?;

        let mut report = SweepReport::default();
        for task in &candidates {
            // The listing may be stale by the time we get here.
            if !inactive_for(task, now, self.policy.inactivity_timeout) {
                continue;
            }
            report.checked += 1;

            match tokio::time::timeout(
                self.policy.sweep_task_timeout,
                self.service.abandon_inactive(task, now),
            )
            .await
            {
                Ok(Ok(Some(episode))) => {
                    report.abandoned += 1;
                    info!(
                        task_id = %task.id,
                        user_id = %task.user_id,
                        inactivity_minutes = episode.inactivity_minutes.unwrap_or_default(),
                        "Task abandoned after inactivity"
                    );
                }
                Ok(Ok(None)) => {
                    report.lost_races += 1;
                    debug!(task_id = %task.id, "Inactive task changed before abandon; skipped");
                }
                Ok(Err(e)) => {
                    report.deferred += 1;
                    warn!(task_id = %task.id, "Failed to abandon inactive task: {e}");
                }
                Err(_) => {
                    report.deferred += 1;
                    warn!(
                        task_id = %task.id,
                        timeout_secs = self.policy.sweep_task_timeout.as_secs(),
                        "Timed out abandoning inactive task"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Runs `sweep_once` on the policy cadence until the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;

            info!(
                interval_secs = self.policy.sweep_interval.as_secs(),
                heartbeat_secs = self.policy.heartbeat_interval.as_secs(),
                timeout_minutes = self.policy.inactivity_timeout.num_minutes(),
                "Inactivity sweeper started"
            );

            loop {
                interval.tick().await;
                match self.sweep_once().await {
                    Ok(report) if report.checked > 0 => {
                        info!(
                            checked = report.checked,
                            abandoned = report.abandoned,
                            lost_races = report.lost_races,
                            deferred = report.deferred,
                            "Inactivity sweep finished"
                        );
                    }
                    Ok(_) => debug!("Inactivity sweep found no candidates"),
                    Err(e) => error!("Inactivity sweep skipped: {e}"),
                }
            }
        })
    }
}

/// True when `task` has been silent for longer than `timeout` as of `now`.
/// Tasks that never recorded activity are not tracked.
pub fn inactive_for(task: &TaskRow, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    task.last_active_at.is_some_and(|at| now - at > timeout)
}
