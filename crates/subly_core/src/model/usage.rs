//! Answers to weekly usage-check prompts.
//!
//! # Invariants
//! - A "used" answer removes the id from the not-used list but keeps its
//!   not-used count.
//! - Counts only grow until the record is purged or all data is reset.

use crate::model::subscription::SubscriptionId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Not-used answers at which a cancellation hint is scheduled.
pub const CANCEL_SUGGESTION_THRESHOLD: u32 = 2;

/// Persisted usage answers, keyed by record id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageResponses {
    /// Records whose latest answer was "not used".
    pub not_used: BTreeSet<SubscriptionId>,
    /// How many times each record was answered "not used".
    pub not_used_counts: BTreeMap<SubscriptionId, u32>,
}

impl UsageResponses {
    /// Records one answer and returns the record's not-used count.
    pub fn record(&mut self, id: SubscriptionId, used: bool) -> u32 {
        if used {
            self.not_used.remove(&id);
            return self.not_used_count(id);
        }
        self.not_used.insert(id);
        let count = self.not_used_counts.entry(id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn not_used_count(&self, id: SubscriptionId) -> u32 {
        self.not_used_counts.get(&id).copied().unwrap_or(0)
    }

    pub fn should_suggest_cancellation(&self, id: SubscriptionId) -> bool {
        self.not_used_count(id) >= CANCEL_SUGGESTION_THRESHOLD
    }

    /// Drops everything known about `id`. Returns whether anything changed.
    pub fn forget(&mut self, id: SubscriptionId) -> bool {
        let listed = self.not_used.remove(&id);
        let counted = self.not_used_counts.remove(&id).is_some();
        listed || counted
    }
}
