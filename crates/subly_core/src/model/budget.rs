//! Budget settings and derived budget status.
//!
//! # Invariants
//! - A budget is only evaluated when enabled with a positive limit.
//! - `notify_at_percentage` stays within `50..=100`.

use serde::{Deserialize, Serialize};

pub const DEFAULT_NOTIFY_PERCENTAGE: f64 = 80.0;
pub const MIN_NOTIFY_PERCENTAGE: f64 = 50.0;
pub const MAX_NOTIFY_PERCENTAGE: f64 = 100.0;
const WARNING_PERCENTAGE: f64 = 80.0;

/// User budget configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Monthly spending limit, `None` when unset.
    pub monthly_limit: Option<f64>,
    /// Alert threshold as a percentage of `monthly_limit`.
    pub notify_at_percentage: f64,
    pub enabled: bool,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            monthly_limit: None,
            notify_at_percentage: DEFAULT_NOTIFY_PERCENTAGE,
            enabled: false,
        }
    }
}

impl BudgetSettings {
    /// Returns the limit when the budget is enabled and has a positive limit.
    pub fn active_limit(&self) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        self.monthly_limit.filter(|limit| *limit > 0.0)
    }

    /// Sets the limit; a positive limit enables the budget, anything else
    /// disables it.
    pub fn set_limit(&mut self, limit: Option<f64>) {
        self.monthly_limit = limit;
        self.enabled = matches!(limit, Some(value) if value > 0.0);
    }

    /// Sets the alert threshold, clamped to `50..=100`.
    pub fn set_notify_percentage(&mut self, percentage: f64) {
        self.notify_at_percentage = percentage.clamp(MIN_NOTIFY_PERCENTAGE, MAX_NOTIFY_PERCENTAGE);
    }
}

/// Coarse budget health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatusLevel {
    Safe,
    Warning,
    Exceeded,
}

/// Snapshot of current spending against the limit.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetStatus {
    pub limit: f64,
    pub current: f64,
    pub percentage: f64,
    /// `limit - current`; negative when over budget.
    pub remaining: f64,
    pub is_over_budget: bool,
    pub level: BudgetStatusLevel,
}

impl BudgetStatus {
    pub fn new(limit: f64, current: f64) -> Self {
        let percentage = if limit > 0.0 {
            current / limit * 100.0
        } else {
            0.0
        };
        let level = if percentage >= 100.0 {
            BudgetStatusLevel::Exceeded
        } else if percentage >= WARNING_PERCENTAGE {
            BudgetStatusLevel::Warning
        } else {
            BudgetStatusLevel::Safe
        };

        Self {
            limit,
            current,
            percentage,
            remaining: limit - current,
            is_over_budget: current > limit,
            level,
        }
    }

    /// Amount by which spending exceeds the limit, zero when within budget.
    pub fn over_by(&self) -> f64 {
        if self.is_over_budget {
            -self.remaining
        } else {
            0.0
        }
    }
}

/// Projected effect of adding one more subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetImpact {
    pub current_spending: f64,
    pub new_monthly_cost: f64,
    pub new_total: f64,
    pub budget_limit: f64,
    pub new_percentage: f64,
    pub will_exceed_budget: bool,
}
