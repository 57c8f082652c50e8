//! Cost aggregation, budget evaluation and spending statistics.
//!
//! # Responsibility
//! - Derive every money figure from the record set using the shared monthly
//!   normalization rule.
//! - Decide whether a budget alert is due.
//!
//! # Invariants
//! - Only active records contribute to totals and statistics.
//! - Every function here is pure; callers pass `now` explicitly.

use crate::model::budget::{BudgetImpact, BudgetSettings, BudgetStatus};
use crate::model::subscription::{BillingCycle, ServiceCategory, Subscription, SubscriptionId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Days ahead counted as an upcoming renewal.
pub const UPCOMING_RENEWAL_DAYS: i64 = 7;
/// Monthly cost at which a subscription counts as expensive in suggestions.
pub const EXPENSIVE_SUGGESTION_THRESHOLD: f64 = 30.0;
/// Monthly category spend above which a category is flagged.
pub const CATEGORY_SUGGESTION_THRESHOLD: f64 = 50.0;
const MAX_EXPENSIVE_SUGGESTIONS: usize = 3;

fn active(records: &[Subscription]) -> impl Iterator<Item = &Subscription> {
    records.iter().filter(|record| record.is_active)
}

/// Sum of normalized monthly costs over active records.
pub fn total_monthly_cost(records: &[Subscription]) -> f64 {
    active(records).map(Subscription::monthly_cost).sum()
}

pub fn total_yearly_cost(records: &[Subscription]) -> f64 {
    total_monthly_cost(records) * 12.0
}

/// Budget status, or `None` when no budget is active.
pub fn budget_status(settings: &BudgetSettings, records: &[Subscription]) -> Option<BudgetStatus> {
    let limit = settings.active_limit()?;
    Some(BudgetStatus::new(limit, total_monthly_cost(records)))
}

/// Returns the status when spending reached the alert threshold.
pub fn should_alert(settings: &BudgetSettings, records: &[Subscription]) -> Option<BudgetStatus> {
    budget_status(settings, records).filter(|status| status.percentage >= settings.notify_at_percentage)
}

/// Projects adding a subscription of `amount` per `cycle`.
pub fn budget_impact(
    settings: &BudgetSettings,
    records: &[Subscription],
    amount: f64,
    cycle: BillingCycle,
) -> Option<BudgetImpact> {
    let limit = settings.active_limit()?;
    let current_spending = total_monthly_cost(records);
    let new_monthly_cost = cycle.monthly_amount(amount);
    let new_total = current_spending + new_monthly_cost;
    Some(BudgetImpact {
        current_spending,
        new_monthly_cost,
        new_total,
        budget_limit: limit,
        new_percentage: new_total / limit * 100.0,
        will_exceed_budget: new_total > limit,
    })
}

/// Monthly spend per category, categories without active records omitted.
pub fn spending_by_category(records: &[Subscription]) -> BTreeMap<ServiceCategory, f64> {
    let mut totals = BTreeMap::new();
    for record in active(records) {
        *totals.entry(record.category).or_insert(0.0) += record.monthly_cost();
    }
    totals
}

pub fn count_by_category(records: &[Subscription]) -> BTreeMap<ServiceCategory, usize> {
    let mut counts = BTreeMap::new();
    for record in active(records) {
        *counts.entry(record.category).or_insert(0) += 1;
    }
    counts
}

/// Active records costing at least `threshold` per month, most expensive first.
pub fn expensive_subscriptions(records: &[Subscription], threshold: f64) -> Vec<Subscription> {
    let mut expensive: Vec<Subscription> = active(records)
        .filter(|record| record.monthly_cost() >= threshold)
        .cloned()
        .collect();
    expensive.sort_by(|left, right| right.monthly_cost().total_cmp(&left.monthly_cost()));
    expensive
}

/// Active records renewing within the next seven days, soonest first.
pub fn upcoming_renewals(records: &[Subscription], now: DateTime<Utc>) -> Vec<Subscription> {
    let mut upcoming: Vec<Subscription> = active(records)
        .filter(|record| (0..=UPCOMING_RENEWAL_DAYS).contains(&record.days_until_renewal(now)))
        .cloned()
        .collect();
    upcoming.sort_by(|left, right| left.next_billing_date.cmp(&right.next_billing_date));
    upcoming
}

/// One savings hint derived from spending patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum SavingSuggestion {
    /// A single subscription with a high monthly cost.
    ExpensiveSubscription {
        record_id: SubscriptionId,
        monthly_cost: f64,
    },
    /// A category whose combined monthly cost is high.
    CategoryHeavy {
        category: ServiceCategory,
        monthly_cost: f64,
    },
}

/// Up to three expensive subscriptions, then every heavy category.
pub fn saving_suggestions(records: &[Subscription]) -> Vec<SavingSuggestion> {
    let mut suggestions: Vec<SavingSuggestion> =
        expensive_subscriptions(records, EXPENSIVE_SUGGESTION_THRESHOLD)
            .into_iter()
            .take(MAX_EXPENSIVE_SUGGESTIONS)
            .map(|record| SavingSuggestion::ExpensiveSubscription {
                record_id: record.id,
                monthly_cost: record.monthly_cost(),
            })
            .collect();

    suggestions.extend(
        spending_by_category(records)
            .into_iter()
            .filter(|(_, total)| *total > CATEGORY_SUGGESTION_THRESHOLD)
            .map(|(category, monthly_cost)| SavingSuggestion::CategoryHeavy {
                category,
                monthly_cost,
            }),
    );
    suggestions
}

#[cfg(test)]
mod tests {
    use super::{
        budget_impact, saving_suggestions, should_alert, spending_by_category, upcoming_renewals,
        SavingSuggestion,
    };
    use crate::model::budget::BudgetSettings;
    use crate::model::subscription::{BillingCycle, ServiceCategory, Subscription};
    use chrono::{Duration, TimeZone, Utc};

    fn sub(amount: f64, category: ServiceCategory) -> Subscription {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        Subscription::new("S", amount, now, now).with_category(category)
    }

    #[test]
    fn inactive_records_are_excluded_from_statistics() {
        let mut gone = sub(40.0, ServiceCategory::Music);
        gone.is_active = false;
        let kept = sub(10.0, ServiceCategory::Music);

        let totals = spending_by_category(&[gone, kept]);

        assert_eq!(totals.get(&ServiceCategory::Music), Some(&10.0));
    }

    #[test]
    fn alert_respects_notify_threshold() {
        let mut settings = BudgetSettings::default();
        settings.set_limit(Some(100.0));
        assert!(should_alert(&settings, &[sub(79.0, ServiceCategory::Other)]).is_none());
        assert!(should_alert(&settings, &[sub(80.0, ServiceCategory::Other)]).is_some());
    }

    #[test]
    fn impact_uses_normalized_cost() {
        let mut settings = BudgetSettings::default();
        settings.set_limit(Some(50.0));
        let current = [sub(45.0, ServiceCategory::Other)];
        let impact = budget_impact(&settings, &current, 120.0, BillingCycle::Yearly).unwrap();
        assert!((impact.new_monthly_cost - 10.0).abs() < 1e-9);
        assert!(impact.will_exceed_budget);
    }

    #[test]
    fn suggestions_cap_expensive_entries() {
        let records: Vec<Subscription> = (0..5)
            .map(|index| sub(31.0 + f64::from(index), ServiceCategory::Software))
            .collect();

        let suggestions = saving_suggestions(&records);

        let expensive = suggestions
            .iter()
            .filter(|s| matches!(s, SavingSuggestion::ExpensiveSubscription { .. }))
            .count();
        assert_eq!(expensive, 3);
        assert!(suggestions.iter().any(|s| matches!(
            s,
            SavingSuggestion::CategoryHeavy {
                category: ServiceCategory::Software,
                ..
            }
        )));
    }

    #[test]
    fn upcoming_window_is_seven_days() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let soon = Subscription::new("Soon", 1.0, now + Duration::days(7), now);
        let later = Subscription::new("Later", 1.0, now + Duration::days(8), now);

        let upcoming = upcoming_renewals(&[later, soon.clone()], now);

        assert_eq!(upcoming, vec![soon]);
    }
}
