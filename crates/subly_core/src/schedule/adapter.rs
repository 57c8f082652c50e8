//! Keeps pending reminders equal to the schedule derived from the record set.
//!
//! # Responsibility
//! - Diff the derived renewal schedule against what is pending and converge.
//! - Scope cancel-and-recreate to one record after a single-record mutation.
//! - Refresh weekly usage checks and fire one-shot budget alerts and
//!   cancellation hints.
//!
//! # Invariants
//! - After `reconcile(active)`, the pending renewal entries are exactly
//!   `schedule_for(active)`; stale keys are cancelled even if another
//!   process scheduled them.
//! - Operations are serialized by the adapter's own lock and receive record
//!   snapshots by value or shared reference, never coordinator state.
//! - Reminder failures are logged and swallowed.

use crate::clock::Clock;
use crate::model::budget::BudgetStatus;
use crate::model::subscription::{Subscription, SubscriptionId};
use crate::schedule::center::ReminderCenter;
use crate::schedule::reminder::{
    cancel_suggestion_for, schedule_for, usage_checks_for, ReminderContent, ReminderId,
    ReminderPolicy, ScheduleEntry, Trigger,
};
use chrono::Duration;
use log::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

const BUDGET_ALERT_DELAY_SECS: i64 = 1;

/// Counts from one reconcile call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub scheduled: usize,
    pub cancelled: usize,
}

/// Adapter between the record set and a [`ReminderCenter`].
pub struct SchedulerAdapter {
    center: Arc<dyn ReminderCenter>,
    policy: ReminderPolicy,
    clock: Arc<dyn Clock>,
    tracked: Mutex<BTreeMap<ReminderId, ScheduleEntry>>,
}

impl SchedulerAdapter {
    pub fn new(
        center: Arc<dyn ReminderCenter>,
        policy: ReminderPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            center,
            policy,
            clock,
            tracked: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn policy(&self) -> &ReminderPolicy {
        &self.policy
    }

    /// Ids this adapter believes are pending.
    pub async fn scheduled_ids(&self) -> Vec<ReminderId> {
        self.tracked.lock().await.keys().copied().collect()
    }

    /// Converges all renewal reminders to `schedule_for(active)`.
    pub async fn reconcile(&self, active: &[Subscription]) -> ScheduleReport {
        let mut tracked = self.tracked.lock().await;
        let target = schedule_for(active, &self.policy, self.clock.now());
        let target_ids: BTreeSet<ReminderId> = target.iter().map(|entry| entry.id).collect();

        let mut known = self.known_ids(&tracked).await;
        known.retain(|id| id.is_renewal());
        let stale: Vec<ReminderId> = known.difference(&target_ids).copied().collect();
        self.cancel_locked(&mut tracked, &stale).await;

        let scheduled = self.replace_locked(&mut tracked, target).await;
        info!(
            "event=schedule_reconcile module=schedule status=ok record_count={} scheduled={} cancelled={}",
            active.len(),
            scheduled,
            stale.len()
        );
        ScheduleReport {
            scheduled,
            cancelled: stale.len(),
        }
    }

    /// Cancels and recreates the renewal reminders of one record.
    ///
    /// Inactive or essential records end with no renewal reminders and no
    /// cancellation hint.
    pub async fn reconcile_record(&self, record: &Subscription) -> ScheduleReport {
        let mut tracked = self.tracked.lock().await;
        let mut ids: BTreeSet<ReminderId> =
            self.policy.renewal_ids(record.id).into_iter().collect();
        if !record.is_active || record.is_essential {
            ids.insert(ReminderId::CancelSuggestion {
                record_id: record.id,
            });
        }
        ids.extend(
            self.known_ids(&tracked)
                .await
                .into_iter()
                .filter(|id| id.is_renewal() && id.record_id() == Some(record.id)),
        );
        let ids: Vec<ReminderId> = ids.into_iter().collect();
        self.cancel_locked(&mut tracked, &ids).await;

        let target = schedule_for(std::slice::from_ref(record), &self.policy, self.clock.now());
        let scheduled = self.replace_locked(&mut tracked, target).await;
        info!(
            "event=schedule_record module=schedule status=ok record_id={} scheduled={scheduled}",
            record.id
        );
        ScheduleReport {
            scheduled,
            cancelled: ids.len(),
        }
    }

    /// Removes every reminder bound to `record_id`.
    pub async fn cancel_record(&self, record_id: SubscriptionId) -> usize {
        let mut tracked = self.tracked.lock().await;
        let mut ids: BTreeSet<ReminderId> =
            self.policy.renewal_ids(record_id).into_iter().collect();
        ids.insert(ReminderId::UsageCheck { record_id });
        ids.insert(ReminderId::CancelSuggestion { record_id });
        ids.extend(
            self.known_ids(&tracked)
                .await
                .into_iter()
                .filter(|id| id.record_id() == Some(record_id)),
        );
        let ids: Vec<ReminderId> = ids.into_iter().collect();
        self.cancel_locked(&mut tracked, &ids).await;
        info!("event=schedule_cancel module=schedule status=ok record_id={record_id}");
        ids.len()
    }

    /// Replaces all weekly usage checks with those derived from `records`.
    pub async fn reconcile_usage_checks(&self, records: &[Subscription]) -> ScheduleReport {
        let mut tracked = self.tracked.lock().await;
        let mut known = self.known_ids(&tracked).await;
        known.retain(|id| id.is_usage_check());
        let stale: Vec<ReminderId> = known.into_iter().collect();
        self.cancel_locked(&mut tracked, &stale).await;

        let scheduled = self
            .replace_locked(&mut tracked, usage_checks_for(records, &self.policy))
            .await;
        info!("event=schedule_usage module=schedule status=ok scheduled={scheduled}");
        ScheduleReport {
            scheduled,
            cancelled: stale.len(),
        }
    }

    /// Fires a one-shot budget alert shortly after now.
    pub async fn alert_budget(&self, status: &BudgetStatus) -> bool {
        let mut tracked = self.tracked.lock().await;
        let entry = ScheduleEntry {
            id: ReminderId::BudgetAlert,
            trigger: Trigger::Once {
                at: self.clock.now() + Duration::seconds(BUDGET_ALERT_DELAY_SECS),
            },
            content: ReminderContent::Budget {
                current_spending: status.current,
                budget_limit: status.limit,
            },
        };
        let scheduled = self.replace_locked(&mut tracked, vec![entry]).await == 1;
        if scheduled {
            info!(
                "event=budget_alert module=schedule status=ok percentage={:.0}",
                status.percentage
            );
        }
        scheduled
    }

    /// Fires a one-shot cancellation hint for `record`.
    ///
    /// Returns false for inactive or essential records and when the center
    /// refuses the entry.
    pub async fn suggest_cancellation(&self, record: &Subscription) -> bool {
        let Some(entry) = cancel_suggestion_for(record, self.clock.now()) else {
            return false;
        };
        let mut tracked = self.tracked.lock().await;
        let scheduled = self.replace_locked(&mut tracked, vec![entry]).await == 1;
        if scheduled {
            info!(
                "event=cancel_suggestion module=schedule status=ok record_id={}",
                record.id
            );
        }
        scheduled
    }

    /// Removes every pending reminder.
    pub async fn cancel_all(&self) {
        let mut tracked = self.tracked.lock().await;
        self.center.remove_all().await;
        tracked.clear();
        info!("event=schedule_cancel_all module=schedule status=ok");
    }

    async fn known_ids(
        &self,
        tracked: &BTreeMap<ReminderId, ScheduleEntry>,
    ) -> BTreeSet<ReminderId> {
        let mut ids: BTreeSet<ReminderId> = tracked.keys().copied().collect();
        ids.extend(self.center.pending().await.into_iter().map(|entry| entry.id));
        ids
    }

    async fn cancel_locked(
        &self,
        tracked: &mut BTreeMap<ReminderId, ScheduleEntry>,
        ids: &[ReminderId],
    ) {
        if ids.is_empty() {
            return;
        }
        self.center.remove(ids).await;
        for id in ids {
            tracked.remove(id);
        }
    }

    /// Cancel-then-add for every entry; returns how many were accepted.
    async fn replace_locked(
        &self,
        tracked: &mut BTreeMap<ReminderId, ScheduleEntry>,
        entries: Vec<ScheduleEntry>,
    ) -> usize {
        if entries.is_empty() {
            return 0;
        }
        if !self.center.is_authorized().await {
            warn!(
                "event=schedule_add module=schedule status=skipped reason=not_authorized count={}",
                entries.len()
            );
            return 0;
        }

        let ids: Vec<ReminderId> = entries.iter().map(|entry| entry.id).collect();
        self.center.remove(&ids).await;

        let mut scheduled = 0;
        for entry in entries {
            let id = entry.id;
            match self.center.add(entry.clone()).await {
                Ok(()) => {
                    tracked.insert(id, entry);
                    scheduled += 1;
                }
                Err(err) => {
                    tracked.remove(&id);
                    error!("event=schedule_add module=schedule status=error reminder_id={id} error={err}");
                }
            }
        }
        scheduled
    }
}
