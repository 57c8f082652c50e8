//! Subscription domain model.
//!
//! # Responsibility
//! - Define the canonical tracked-subscription record.
//! - Own the cost normalization rule shared by budget and statistics code.
//! - Provide lifecycle helpers for soft-delete semantics.
//!
//! # Invariants
//! - `id` is stable and never reused for another subscription.
//! - `is_active == false` is a soft delete; the record stays in the set.
//! - `updated_at` is the only conflict-resolution key; every mutation helper
//!   takes the mutation time explicitly and stamps it.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a tracked subscription.
pub type SubscriptionId = Uuid;

/// Average number of weeks per month used for weekly normalization.
pub const WEEKS_PER_MONTH: f64 = 4.33;

/// Default currency code for new and remote-origin records.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// Recurrence period of a subscription charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Converts one charge of `amount` into its monthly equivalent.
    pub fn monthly_amount(self, amount: f64) -> f64 {
        match self {
            Self::Weekly => amount * WEEKS_PER_MONTH,
            Self::Monthly => amount,
            Self::Yearly => amount / 12.0,
        }
    }

    /// Stable wire value used by local snapshots and the remote shape.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Parses a wire value. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }
}

/// Service category used for grouping statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Streaming,
    Music,
    Software,
    Fitness,
    Cloud,
    News,
    Gaming,
    Phone,
    Other,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 9] = [
        Self::Streaming,
        Self::Music,
        Self::Software,
        Self::Fitness,
        Self::Cloud,
        Self::News,
        Self::Gaming,
        Self::Phone,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Music => "music",
            Self::Software => "software",
            Self::Fitness => "fitness",
            Self::Cloud => "cloud",
            Self::News => "news",
            Self::Gaming => "gaming",
            Self::Phone => "phone",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == value)
    }
}

/// Validation errors for subscription invariants.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionValidationError {
    /// `id` must not be nil.
    NilId,
    /// `service_name` must contain non-whitespace text.
    BlankServiceName,
    /// `amount` must be finite and not negative.
    InvalidAmount(f64),
}

impl Display for SubscriptionValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "subscription id must not be nil"),
            Self::BlankServiceName => write!(f, "service name must not be blank"),
            Self::InvalidAmount(amount) => {
                write!(f, "amount must be finite and non-negative, got {amount}")
            }
        }
    }
}

impl Error for SubscriptionValidationError {}

/// Canonical tracked subscription record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub service_name: String,
    /// User-facing override for `service_name`.
    pub custom_name: Option<String>,
    /// Charge per billing cycle.
    pub amount: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: DateTime<Utc>,
    pub notes: Option<String>,
    /// `false` is a soft-delete tombstone.
    pub is_active: bool,
    pub category: ServiceCategory,
    /// Excludes the record from usage prompts and renewal reminders.
    pub is_essential: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates an active monthly subscription with a generated id.
    ///
    /// `now` becomes both `created_at` and `updated_at`.
    pub fn new(
        service_name: impl Into<String>,
        amount: f64,
        next_billing_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_name: service_name.into(),
            custom_name: None,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            billing_cycle: BillingCycle::Monthly,
            next_billing_date,
            notes: None,
            is_active: true,
            category: ServiceCategory::Other,
            is_essential: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style cycle override.
    pub fn with_cycle(mut self, cycle: BillingCycle) -> Self {
        self.billing_cycle = cycle;
        self
    }

    /// Builder-style category override.
    pub fn with_category(mut self, category: ServiceCategory) -> Self {
        self.category = category;
        self
    }

    /// Validates record invariants.
    ///
    /// # Errors
    /// - Returns [`SubscriptionValidationError`] on the first violated rule.
    pub fn validate(&self) -> Result<(), SubscriptionValidationError> {
        if self.id.is_nil() {
            return Err(SubscriptionValidationError::NilId);
        }
        if self.service_name.trim().is_empty() {
            return Err(SubscriptionValidationError::BlankServiceName);
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(SubscriptionValidationError::InvalidAmount(self.amount));
        }
        Ok(())
    }

    /// Name to show: a non-blank `custom_name`, otherwise `service_name`.
    pub fn display_name(&self) -> &str {
        match self.custom_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.service_name.as_str(),
        }
    }

    pub fn monthly_cost(&self) -> f64 {
        self.billing_cycle.monthly_amount(self.amount)
    }

    pub fn yearly_cost(&self) -> f64 {
        self.monthly_cost() * 12.0
    }

    /// Short cost label carried in reminder payloads, e.g. `12.99 EUR`.
    pub fn cost_display(&self) -> String {
        format!("{:.2} {}", self.amount, self.currency)
    }

    /// Whole calendar days from `now` until the next charge (UTC dates).
    pub fn days_until_renewal(&self, now: DateTime<Utc>) -> i64 {
        (self.next_billing_date.date_naive() - now.date_naive()).num_days()
    }

    /// Marks the subscription as softly deleted.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.touch(now);
    }

    /// Clears the soft-delete flag.
    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.touch(now);
    }

    /// Moves `next_billing_date` forward by one billing cycle.
    ///
    /// Month arithmetic clamps to the last valid day (Jan 31 -> Feb 28/29).
    pub fn advance_to_next_billing_date(&mut self, now: DateTime<Utc>) {
        let current = self.next_billing_date;
        let next = match self.billing_cycle {
            BillingCycle::Weekly => current.checked_add_days(Days::new(7)),
            BillingCycle::Monthly => current.checked_add_months(Months::new(1)),
            BillingCycle::Yearly => current.checked_add_months(Months::new(12)),
        };
        self.next_billing_date = next.unwrap_or(current);
        self.touch(now);
    }

    /// Stamps `updated_at` with the mutation time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Sorts a record set into canonical order: `next_billing_date` ascending,
/// ties broken by id so repeated sorts are deterministic.
pub fn sort_canonical(records: &mut [Subscription]) {
    records.sort_by(|left, right| {
        left.next_billing_date
            .cmp(&right.next_billing_date)
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[cfg(test)]
mod tests {
    use super::{sort_canonical, BillingCycle, ServiceCategory, Subscription};
    use chrono::{TimeZone, Utc};

    #[test]
    fn monthly_normalization_matches_cycle_rules() {
        assert!((BillingCycle::Weekly.monthly_amount(10.0) - 43.30).abs() < 1e-9);
        assert!((BillingCycle::Yearly.monthly_amount(120.0) - 10.0).abs() < 1e-9);
        assert!((BillingCycle::Monthly.monthly_amount(9.99) - 9.99).abs() < 1e-9);
    }

    #[test]
    fn category_parse_rejects_unknown_values() {
        assert_eq!(ServiceCategory::parse("music"), Some(ServiceCategory::Music));
        assert_eq!(ServiceCategory::parse("Music"), None);
        assert_eq!(BillingCycle::parse("daily"), None);
    }

    #[test]
    fn advance_clamps_to_end_of_month() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let mut sub = Subscription::new("Gym", 30.0, due, now);

        let later = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        sub.advance_to_next_billing_date(later);

        assert_eq!(
            sub.next_billing_date,
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
        assert_eq!(sub.updated_at, later);
    }

    #[test]
    fn sort_canonical_orders_by_due_date() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Subscription::new("B", 1.0, now + chrono::Duration::days(9), now);
        let early = Subscription::new("A", 1.0, now + chrono::Duration::days(2), now);
        let mut records = vec![late.clone(), early.clone()];

        sort_canonical(&mut records);

        assert_eq!(records[0].id, early.id);
        assert_eq!(records[1].id, late.id);
    }
}
