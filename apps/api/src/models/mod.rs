pub mod abandonment;
pub mod context_switch;
pub mod distraction;
pub mod task;
