//! Read-side summaries over the append-only logs. Pure functions over rows
//! already filtered to one user and one window; handlers do the loading.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engagement::types::{AbandonmentType, DistractionType};
use crate::models::abandonment::TaskAbandonmentRow;
use crate::models::context_switch::ContextSwitchRow;
use crate::models::distraction::DistractionLogRow;

pub const DEFAULT_PERIOD_DAYS: u32 = 7;
pub const MAX_PERIOD_DAYS: u32 = 365;
const TOP_PATTERNS: usize = 5;

/// `?days=` window shared by every summary endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodQuery {
    pub days: Option<u32>,
}

impl PeriodQuery {
    pub fn days(&self) -> u32 {
        self.days.unwrap_or(DEFAULT_PERIOD_DAYS).clamp(1, MAX_PERIOD_DAYS)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

// ────────────────────────────────────────────────────────────────────────────
// Abandonments
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AbandonmentSummary {
    pub period_days: u32,
    pub total_abandonments: usize,
    pub resumed: usize,
    /// Episodes neither resumed nor closed with their task.
    pub still_open: usize,
    pub auto_detected: usize,
    /// Percentage of episodes in the window that were resumed.
    pub resume_rate: f64,
    pub average_work_minutes: f64,
    pub average_minutes_to_resume: Option<f64>,
    pub most_common_type: Option<AbandonmentType>,
}

pub fn summarize_abandonments(rows: &[TaskAbandonmentRow], period_days: u32) -> AbandonmentSummary {
    let total = rows.len();
    let resumed = rows.iter().filter(|a| a.resumed).count();

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        *by_type.entry(row.abandonment_type.as_str()).or_default() += 1;
    }
    // Ties go to the type that sorts first, so the answer is stable.
    let most_common_type = by_type
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .and_then(|(kind, _)| kind.parse().ok());

    AbandonmentSummary {
        period_days,
        total_abandonments: total,
        resumed,
        still_open: rows.iter().filter(|a| a.is_open()).count(),
        auto_detected: rows.iter().filter(|a| a.auto_detected).count(),
        resume_rate: if total == 0 {
            0.0
        } else {
            round1(resumed as f64 * 100.0 / total as f64)
        },
        average_work_minutes: round1(
            mean(rows.iter().map(|a| f64::from(a.duration_minutes))).unwrap_or(0.0),
        ),
        average_minutes_to_resume: mean(
            rows.iter()
                .filter_map(TaskAbandonmentRow::minutes_to_resume)
                .map(|m| m as f64),
        )
        .map(round1),
        most_common_type,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Context switches
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SwitchPattern {
    pub from_category: Option<String>,
    pub to_category: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SwitchAnalytics {
    pub period_days: u32,
    pub total_switches: usize,
    pub significant_switches: usize,
    pub average_cost_minutes: f64,
    pub total_cost_minutes: i64,
    pub total_cost_hours: f64,
    pub common_patterns: Vec<SwitchPattern>,
}

pub fn summarize_switches(rows: &[ContextSwitchRow], period_days: u32) -> SwitchAnalytics {
    let total_cost_minutes: i64 = rows.iter().map(|s| i64::from(s.estimated_cost_minutes)).sum();

    let mut patterns: BTreeMap<(Option<&str>, Option<&str>), usize> = BTreeMap::new();
    for row in rows {
        let key = (row.from_category.as_deref(), row.to_category.as_deref());
        *patterns.entry(key).or_default() += 1;
    }
    let mut common_patterns: Vec<SwitchPattern> = patterns
        .into_iter()
        .map(|((from, to), count)| SwitchPattern {
            from_category: from.map(str::to_string),
            to_category: to.map(str::to_string),
            count,
        })
        .collect();
    // Stable sort keeps category order among equal counts.
    common_patterns.sort_by(|a, b| b.count.cmp(&a.count));
    common_patterns.truncate(TOP_PATTERNS);

    SwitchAnalytics {
        period_days,
        total_switches: rows.len(),
        significant_switches: rows.iter().filter(|s| s.is_significant_switch).count(),
        average_cost_minutes: round1(
            mean(rows.iter().map(|s| f64::from(s.estimated_cost_minutes))).unwrap_or(0.0),
        ),
        total_cost_minutes,
        total_cost_hours: round1(total_cost_minutes as f64 / 60.0),
        common_patterns,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Distractions
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DistractionTypeCount {
    pub distraction_type: DistractionType,
    pub count: usize,
    pub total_duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DistractionAnalytics {
    pub period_days: u32,
    pub total_distractions: usize,
    pub average_duration_seconds: f64,
    pub top_distractions: Vec<DistractionTypeCount>,
    pub by_hour_of_day: Vec<HourCount>,
}

pub fn summarize_distractions(rows: &[DistractionLogRow], period_days: u32) -> DistractionAnalytics {
    use chrono::Timelike;

    let mut by_type: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
    let mut by_hour: BTreeMap<u32, usize> = BTreeMap::new();
    for row in rows {
        let entry = by_type.entry(row.distraction_type.as_str()).or_default();
        entry.0 += 1;
        entry.1 += i64::from(row.duration_seconds.unwrap_or(0));
        *by_hour.entry(row.time_of_day.hour()).or_default() += 1;
    }

    let mut top_distractions: Vec<DistractionTypeCount> = by_type
        .into_iter()
        .filter_map(|(kind, (count, total))| {
            Some(DistractionTypeCount {
                distraction_type: kind.parse().ok()?,
                count,
                total_duration_seconds: total,
            })
        })
        .collect();
    top_distractions.sort_by(|a, b| b.count.cmp(&a.count));

    DistractionAnalytics {
        period_days,
        total_distractions: rows.len(),
        average_duration_seconds: round1(
            mean(rows.iter().filter_map(|d| d.duration_seconds).map(f64::from)).unwrap_or(0.0),
        ),
        top_distractions,
        by_hour_of_day: by_hour
            .into_iter()
            .map(|(hour, count)| HourCount { hour, count })
            .collect(),
    }
}
