//! Task engagement tracking: heartbeats, inactivity sweeps, abandonment
//! episodes, context-switch evaluation and distraction logging.
//!
//! Every write to a task's engagement fields goes through
//! `state_machine::decide` and one `EngagementStore::commit`.

pub mod clock;
pub mod context_switch;
pub mod distraction;
pub mod handlers;
pub mod pg_store;
pub mod policy;
pub mod service;
pub mod state_machine;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod types;

#[cfg(test)]
pub mod memory_store;
