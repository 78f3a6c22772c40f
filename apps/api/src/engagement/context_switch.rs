//! Context-switch evaluation: pluggable recovery-cost model plus the
//! evaluator that snapshots both tasks into an immutable decision record.
//!
//! Default: `BaselineCost` (flat minutes for every significant switch).
//! `DifficultyScaledCost` adds minutes per focus-difficulty step when
//! `SWITCH_COST_PER_DIFFICULTY_STEP` is non-zero.
//!
//! The evaluator never touches engagement state; it only appends to the
//! context-switch log.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engagement::policy::EngagementPolicy;
use crate::engagement::service::owned_task;
use crate::engagement::store::{EngagementStore, NewContextSwitch};
use crate::errors::AppError;
use crate::models::context_switch::ContextSwitchRow;
use crate::models::task::TaskRow;

pub const MAX_NOTE_CHARS: usize = 500;
const SIGNIFICANT_DIFFICULTY_JUMP: i32 = 2;

// ────────────────────────────────────────────────────────────────────────────
// Cost models
// ────────────────────────────────────────────────────────────────────────────

/// Estimates recovery minutes for a switch already judged significant.
///
/// Carried in `AppState` (through the evaluator) as `Arc<dyn SwitchCostModel>`.
pub trait SwitchCostModel: Send + Sync {
    fn estimate(&self, from: &TaskRow, to: &TaskRow) -> i32;

    /// Backend name, for log lines.
    fn name(&self) -> &'static str;
}

pub struct BaselineCost {
    pub minutes: i32,
}

impl SwitchCostModel for BaselineCost {
    fn estimate(&self, _from: &TaskRow, _to: &TaskRow) -> i32 {
        self.minutes
    }

    fn name(&self) -> &'static str {
        "baseline"
    }
}

/// `baseline + per_step × |Δ focus_difficulty|`.
pub struct DifficultyScaledCost {
    pub baseline_minutes: i32,
    pub per_step_minutes: i32,
}

impl SwitchCostModel for DifficultyScaledCost {
    fn estimate(&self, from: &TaskRow, to: &TaskRow) -> i32 {
        let steps = difficulty_jump(from, to);
        self.baseline_minutes
            .saturating_add(self.per_step_minutes.saturating_mul(steps))
    }

    fn name(&self) -> &'static str {
        "difficulty_scaled"
    }
}

/// Picks the cost model the policy asks for.
pub fn cost_model_for(policy: &EngagementPolicy) -> Arc<dyn SwitchCostModel> {
    if policy.switch_cost_per_difficulty_step > 0 {
        Arc::new(DifficultyScaledCost {
            baseline_minutes: policy.switch_baseline_cost_minutes,
            per_step_minutes: policy.switch_cost_per_difficulty_step,
        })
    } else {
        Arc::new(BaselineCost {
            minutes: policy.switch_baseline_cost_minutes,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pure assessment
// ────────────────────────────────────────────────────────────────────────────

/// What made a switch significant. Both may hold at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwitchFactors {
    pub category_changed: bool,
    pub difficulty_jump: bool,
}

impl SwitchFactors {
    pub fn any(&self) -> bool {
        self.category_changed || self.difficulty_jump
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchAssessment {
    pub factors: SwitchFactors,
    pub estimated_cost_minutes: i32,
}

impl SwitchAssessment {
    pub fn is_significant(&self) -> bool {
        self.factors.any()
    }
}

fn difficulty_jump(from: &TaskRow, to: &TaskRow) -> i32 {
    (from.focus_difficulty - to.focus_difficulty).abs()
}

/// A switch from nothing is never significant and costs nothing.
pub fn assess_switch(
    from: Option<&TaskRow>,
    to: &TaskRow,
    costs: &dyn SwitchCostModel,
) -> SwitchAssessment {
    let Some(from) = from else {
        return SwitchAssessment {
            factors: SwitchFactors::default(),
            estimated_cost_minutes: 0,
        };
    };

    let factors = SwitchFactors {
        category_changed: from.category != to.category,
        difficulty_jump: difficulty_jump(from, to) >= SIGNIFICANT_DIFFICULTY_JUMP,
    };
    let estimated_cost_minutes = if factors.any() {
        costs.estimate(from, to).max(0)
    } else {
        0
    };

    SwitchAssessment {
        factors,
        estimated_cost_minutes,
    }
}

/// Human-readable warning for a significant switch.
pub fn warning_message(from: &TaskRow, to: &TaskRow, assessment: &SwitchAssessment) -> String {
    let mut message = format!(
        "Context switch detected: from \"{}\" ({}, difficulty {}) to \"{}\" ({}, difficulty {}). \
         Estimated recovery time: ~{} minutes.",
        from.title,
        from.category,
        from.focus_difficulty,
        to.title,
        to.category,
        to.focus_difficulty,
        assessment.estimated_cost_minutes,
    );
    if assessment.factors.category_changed {
        message.push_str(
            " Different categories need a mental reset; batching similar tasks keeps switches cheap.",
        );
    }
    if assessment.factors.difficulty_jump {
        message.push_str(" The focus difficulty changes sharply; take a moment to prepare.");
    }
    message
}

// ────────────────────────────────────────────────────────────────────────────
// Evaluator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EvaluateSwitch {
    pub user_id: Uuid,
    /// Supplied by the caller; never inferred from session state.
    pub from_task_id: Option<Uuid>,
    pub to_task_id: Uuid,
    pub user_proceeded: bool,
    pub user_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SwitchEvaluation {
    pub context_switch: ContextSwitchRow,
    pub should_warn: bool,
    pub warning_message: Option<String>,
}

#[derive(Clone)]
pub struct ContextSwitchEvaluator {
    store: Arc<dyn EngagementStore>,
    costs: Arc<dyn SwitchCostModel>,
}

impl ContextSwitchEvaluator {
    pub fn new(store: Arc<dyn EngagementStore>, costs: Arc<dyn SwitchCostModel>) -> Self {
        Self { store, costs }
    }

    pub async fn evaluate(&self, request: EvaluateSwitch) -> Result<SwitchEvaluation, AppError> {
        if request
            .user_note
            .as_deref()
            .is_some_and(|n| n.chars().count() > MAX_NOTE_CHARS)
        {
            return Err(AppError::Validation(format!(
                "user_note must be at most {MAX_NOTE_CHARS} characters"
            )));
        }

        let to = owned_task(self.store.as_ref(), request.to_task_id, request.user_id).await?;
        let from = match request.from_task_id {
            Some(id) => Some(owned_task(self.store.as_ref(), id, request.user_id).await?),
            None => None,
        };

        let assessment = assess_switch(from.as_ref(), &to, self.costs.as_ref());
        let record = NewContextSwitch {
            user_id: request.user_id,
            from_task_id: from.as_ref().map(|t| t.id),
            from_category: from.as_ref().map(|t| t.category.clone()),
            from_focus_difficulty: from.as_ref().map(|t| t.focus_difficulty),
            to_task_id: to.id,
            to_category: Some(to.category.clone()),
            to_focus_difficulty: Some(to.focus_difficulty),
            is_significant_switch: assessment.is_significant(),
            estimated_cost_minutes: assessment.estimated_cost_minutes,
            user_proceeded: request.user_proceeded,
            user_note: request.user_note,
        };
        let context_switch = self.store.append_context_switch(&record).await?;

        if assessment.is_significant() {
            info!(
                user_id = %request.user_id,
                to_task_id = %to.id,
                cost_minutes = assessment.estimated_cost_minutes,
                cost_model = self.costs.name(),
                user_proceeded = request.user_proceeded,
                "Significant context switch logged"
            );
        }

        let warning_message = match (&from, assessment.is_significant()) {
            (Some(from), true) => Some(warning_message(from, &to, &assessment)),
            _ => None,
        };

        Ok(SwitchEvaluation {
            context_switch,
            should_warn: assessment.is_significant(),
            warning_message,
        })
    }
}
