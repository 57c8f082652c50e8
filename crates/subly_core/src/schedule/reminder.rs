//! Reminder identities, triggers and the pure schedule derivation.
//!
//! # Invariants
//! - Reminder identity is deterministic: `(record id, days before due)`.
//! - `schedule_for` is a pure function of the active set, the policy and
//!   `now`; entries whose fire time is not strictly after `now` are skipped.
//! - Essential and inactive records never produce renewal or usage entries.

use crate::model::subscription::{Subscription, SubscriptionId};
use chrono::{
    DateTime, Days, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use std::fmt::{Display, Formatter};

/// Default offsets (days before the due date) for renewal reminders.
pub const DEFAULT_DAYS_BEFORE: [u32; 3] = [3, 1, 0];

const CANCEL_SUGGESTION_DELAY_SECS: i64 = 2;

const USAGE_CHECK_WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Deterministic identifier of one scheduled reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReminderId {
    /// Renewal reminder `days_before` days ahead of the due date.
    Renewal {
        record_id: SubscriptionId,
        days_before: u32,
    },
    /// Weekly "did you use it" prompt.
    UsageCheck { record_id: SubscriptionId },
    /// One-shot hint after repeated "not used" answers.
    CancelSuggestion { record_id: SubscriptionId },
    /// One-shot budget threshold alert.
    BudgetAlert,
}

impl ReminderId {
    /// Returns the record this reminder belongs to, if any.
    pub fn record_id(&self) -> Option<SubscriptionId> {
        match self {
            Self::Renewal { record_id, .. }
            | Self::UsageCheck { record_id }
            | Self::CancelSuggestion { record_id } => Some(*record_id),
            Self::BudgetAlert => None,
        }
    }

    pub fn is_renewal(&self) -> bool {
        matches!(self, Self::Renewal { .. })
    }

    pub fn is_usage_check(&self) -> bool {
        matches!(self, Self::UsageCheck { .. })
    }
}

impl Display for ReminderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Renewal {
                record_id,
                days_before,
            } => write!(f, "{record_id}-{days_before}"),
            Self::UsageCheck { record_id } => write!(f, "usage-check-{record_id}"),
            Self::CancelSuggestion { record_id } => write!(f, "cancel-suggestion-{record_id}"),
            Self::BudgetAlert => write!(f, "budget-alert"),
        }
    }
}

/// When a reminder fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fires once at `at`.
    Once { at: DateTime<Utc> },
    /// Fires every day at `time`, or weekly on `weekday` when set.
    Repeating {
        weekday: Option<Weekday>,
        time: NaiveTime,
    },
}

/// Small record snapshot carried by record-bound reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPayload {
    pub record_id: SubscriptionId,
    pub display_name: String,
    pub service_name: String,
    pub cost_display: String,
}

impl ReminderPayload {
    pub fn from_record(record: &Subscription) -> Self {
        Self {
            record_id: record.id,
            display_name: record.display_name().to_string(),
            service_name: record.service_name.clone(),
            cost_display: record.cost_display(),
        }
    }
}

/// Data a reminder carries to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderContent {
    Record(ReminderPayload),
    Budget { current_spending: f64, budget_limit: f64 },
}

/// One reminder to hand to the reminder center.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub id: ReminderId,
    pub trigger: Trigger,
    pub content: ReminderContent,
}

/// Timing rules for derived reminders.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderPolicy {
    /// Offsets before the due date, in days.
    pub days_before: Vec<u32>,
    /// Local time of day renewal reminders fire.
    pub fire_time: NaiveTime,
    /// Local time of day weekly usage checks fire.
    pub usage_check_time: NaiveTime,
    /// Offset used to derive local calendar dates.
    pub utc_offset: FixedOffset,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            days_before: DEFAULT_DAYS_BEFORE.to_vec(),
            fire_time: NaiveTime::from_hms_opt(17, 30, 0).unwrap_or(NaiveTime::MIN),
            usage_check_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset: Utc.fix(),
        }
    }
}

impl ReminderPolicy {
    /// Computes when the `days_before` renewal reminder for `record` fires.
    ///
    /// Returns `None` when the date arithmetic leaves the supported range.
    pub fn fire_time_for(&self, record: &Subscription, days_before: u32) -> Option<DateTime<Utc>> {
        let due_local = record
            .next_billing_date
            .with_timezone(&self.utc_offset)
            .date_naive();
        let fire_day = due_local.checked_sub_days(Days::new(u64::from(days_before)))?;
        let local = fire_day.and_time(self.fire_time);
        self.utc_offset
            .from_local_datetime(&local)
            .single()
            .map(|fire| fire.with_timezone(&Utc))
    }

    /// All renewal ids this policy can produce for `record_id`.
    pub fn renewal_ids(&self, record_id: SubscriptionId) -> Vec<ReminderId> {
        self.days_before
            .iter()
            .map(|days_before| ReminderId::Renewal {
                record_id,
                days_before: *days_before,
            })
            .collect()
    }
}

fn is_reminder_eligible(record: &Subscription) -> bool {
    record.is_active && !record.is_essential
}

/// Derives the full renewal schedule for `records`.
///
/// Inactive and essential records are ignored; past fire times are skipped.
pub fn schedule_for(
    records: &[Subscription],
    policy: &ReminderPolicy,
    now: DateTime<Utc>,
) -> Vec<ScheduleEntry> {
    records
        .iter()
        .filter(|record| is_reminder_eligible(record))
        .flat_map(|record| {
            policy.days_before.iter().filter_map(move |days_before| {
                let at = policy.fire_time_for(record, *days_before)?;
                if at <= now {
                    return None;
                }
                Some(ScheduleEntry {
                    id: ReminderId::Renewal {
                        record_id: record.id,
                        days_before: *days_before,
                    },
                    trigger: Trigger::Once { at },
                    content: ReminderContent::Record(ReminderPayload::from_record(record)),
                })
            })
        })
        .collect()
}

/// Derives weekly usage-check prompts, spread over the week starting Sunday.
pub fn usage_checks_for(records: &[Subscription], policy: &ReminderPolicy) -> Vec<ScheduleEntry> {
    records
        .iter()
        .filter(|record| is_reminder_eligible(record))
        .enumerate()
        .map(|(index, record)| ScheduleEntry {
            id: ReminderId::UsageCheck {
                record_id: record.id,
            },
            trigger: Trigger::Repeating {
                weekday: Some(USAGE_CHECK_WEEKDAYS[index % USAGE_CHECK_WEEKDAYS.len()]),
                time: policy.usage_check_time,
            },
            content: ReminderContent::Record(ReminderPayload::from_record(record)),
        })
        .collect()
}

/// One-shot cancellation hint for a record the user keeps not using.
///
/// `None` for inactive or essential records.
pub fn cancel_suggestion_for(record: &Subscription, now: DateTime<Utc>) -> Option<ScheduleEntry> {
    if !is_reminder_eligible(record) {
        return None;
    }
    Some(ScheduleEntry {
        id: ReminderId::CancelSuggestion {
            record_id: record.id,
        },
        trigger: Trigger::Once {
            at: now + Duration::seconds(CANCEL_SUGGESTION_DELAY_SECS),
        },
        content: ReminderContent::Record(ReminderPayload::from_record(record)),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        cancel_suggestion_for, schedule_for, usage_checks_for, ReminderId, ReminderPolicy, Trigger,
    };
    use crate::model::subscription::Subscription;
    use chrono::{Duration, FixedOffset, TimeZone, Utc, Weekday};

    #[test]
    fn reminder_ids_render_stable_identifiers() {
        let id = uuid::Uuid::parse_str("11111111-2222-4333-8444-555555555555").unwrap();
        let renewal = ReminderId::Renewal {
            record_id: id,
            days_before: 3,
        };
        assert_eq!(renewal.to_string(), "11111111-2222-4333-8444-555555555555-3");
        assert_eq!(
            ReminderId::UsageCheck { record_id: id }.to_string(),
            "usage-check-11111111-2222-4333-8444-555555555555"
        );
        assert_eq!(
            ReminderId::CancelSuggestion { record_id: id }.to_string(),
            "cancel-suggestion-11111111-2222-4333-8444-555555555555"
        );
        assert_eq!(ReminderId::BudgetAlert.to_string(), "budget-alert");
    }

    #[test]
    fn cancel_suggestion_skips_essential_records() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let mut record = Subscription::new("Gym", 30.0, now + Duration::days(3), now);

        let entry = cancel_suggestion_for(&record, now).unwrap();
        assert_eq!(
            entry.trigger,
            Trigger::Once {
                at: now + Duration::seconds(2)
            }
        );

        record.is_essential = true;
        assert!(cancel_suggestion_for(&record, now).is_none());
    }

    #[test]
    fn fire_time_uses_local_calendar_date() {
        let policy = ReminderPolicy {
            utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            ..ReminderPolicy::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        // 23:00 UTC on June 10 is June 11 in UTC+2.
        let due = Utc.with_ymd_and_hms(2026, 6, 10, 23, 0, 0).unwrap();
        let record = Subscription::new("Cloud", 2.0, due, now);

        let fire = policy.fire_time_for(&record, 1).unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 6, 10, 15, 30, 0).unwrap());
    }

    #[test]
    fn essential_records_are_not_scheduled() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let mut record = Subscription::new("Phone", 15.0, now + Duration::days(10), now);
        record.is_essential = true;

        assert!(schedule_for(&[record.clone()], &ReminderPolicy::default(), now).is_empty());
        assert!(usage_checks_for(&[record], &ReminderPolicy::default()).is_empty());
    }

    #[test]
    fn usage_checks_spread_across_weekdays() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let records: Vec<Subscription> = (0..8)
            .map(|index| Subscription::new(format!("S{index}"), 1.0, now, now))
            .collect();

        let entries = usage_checks_for(&records, &ReminderPolicy::default());

        assert_eq!(entries.len(), 8);
        let weekday_of = |index: usize| match entries[index].trigger {
            Trigger::Repeating { weekday, .. } => weekday,
            Trigger::Once { .. } => None,
        };
        assert_eq!(weekday_of(0), Some(Weekday::Sun));
        assert_eq!(weekday_of(1), Some(Weekday::Mon));
        assert_eq!(weekday_of(7), Some(Weekday::Sun));
    }
}
