use std::sync::Arc;

use crate::config::Config;
use crate::engagement::context_switch::ContextSwitchEvaluator;
use crate::engagement::distraction::DistractionLogger;
use crate::engagement::service::EngagementService;
use crate::engagement::store::EngagementStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pluggable store. Default: PgEngagementStore.
    pub store: Arc<dyn EngagementStore>,
    pub engagement: EngagementService,
    pub switches: ContextSwitchEvaluator,
    pub distractions: DistractionLogger,
    pub config: Config,
}
