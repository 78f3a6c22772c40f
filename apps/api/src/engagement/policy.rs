use std::time::Duration;

use crate::config::Config;

/// Product constants for liveness tracking. The state machine, sweeper and
/// context-switch evaluator receive these explicitly.
#[derive(Debug, Clone)]
pub struct EngagementPolicy {
    /// Silence after which an in-progress task is abandoned.
    pub inactivity_timeout: chrono::Duration,
    /// Cadence clients are expected to heartbeat at. Only sizes the sweep.
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    /// Upper bound for evaluating one task inside a sweep.
    pub sweep_task_timeout: Duration,
    pub switch_baseline_cost_minutes: i32,
    pub switch_cost_per_difficulty_step: i32,
}

impl Default for EngagementPolicy {
    fn default() -> Self {
        let inactivity_timeout = chrono::Duration::minutes(15);
        let heartbeat_interval = Duration::from_secs(60);
        Self {
            inactivity_timeout,
            heartbeat_interval,
            sweep_interval: sweep_cadence(inactivity_timeout, heartbeat_interval, None),
            sweep_task_timeout: Duration::from_secs(10),
            switch_baseline_cost_minutes: 23,
            switch_cost_per_difficulty_step: 0,
        }
    }
}

impl EngagementPolicy {
    pub fn from_config(config: &Config) -> Self {
        let inactivity_timeout = chrono::Duration::minutes(config.inactivity_timeout_minutes.max(1));
        let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        Self {
            inactivity_timeout,
            heartbeat_interval,
            sweep_interval: sweep_cadence(
                inactivity_timeout,
                heartbeat_interval,
                config.sweep_interval_secs.map(Duration::from_secs),
            ),
            sweep_task_timeout: Duration::from_secs(config.sweep_task_timeout_secs.max(1)),
            switch_baseline_cost_minutes: config.switch_baseline_cost_minutes.max(0),
            switch_cost_per_difficulty_step: config.switch_cost_per_difficulty_step.max(0),
        }
    }
}

/// Sweep cadence: the requested interval (or a third of the timeout), never
/// shorter than the heartbeat interval and never longer than the timeout.
/// The timeout bound wins when the two bounds cross.
pub fn sweep_cadence(
    inactivity_timeout: chrono::Duration,
    heartbeat_interval: Duration,
    requested: Option<Duration>,
) -> Duration {
    let timeout = inactivity_timeout.to_std().unwrap_or(Duration::from_secs(60));
    let wanted = requested.unwrap_or(timeout / 3);
    wanted.max(heartbeat_interval).min(timeout)
}
