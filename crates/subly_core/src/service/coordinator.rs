//! Subscription coordinator: the single owner of the canonical record set.
//!
//! # Responsibility
//! - Serialize every mutation entry point behind one async lock.
//! - Persist locally before any remote push is attempted.
//! - Drive the reconciler on refresh and keep reminders in lockstep.
//! - Record usage-check answers and hint at cancelling unused records.
//!
//! # Invariants
//! - Every mutation stamps `updated_at` from the injected clock.
//! - The canonical set holds one entry per id, in canonical order.
//! - A record id stays pending until a push confirms the exact version that
//!   is still current, or a successful refresh pass clears it.
//! - No remote call runs while the state lock is held; refresh fetches
//!   unlocked and merges against the state current at re-lock time.
//! - Ids mutated while a refresh is fetching stay local-authoritative for
//!   that refresh's merge.
//! - Store, remote and reminder failures are logged and never returned.

use crate::clock::Clock;
use crate::model::budget::{BudgetImpact, BudgetSettings, BudgetStatus};
use crate::model::subscription::{
    sort_canonical, BillingCycle, Subscription, SubscriptionId, SubscriptionValidationError,
};
use crate::model::usage::UsageResponses;
use crate::repo::record_store::{RecordStore, SettingsStore};
use crate::schedule::adapter::{ScheduleReport, SchedulerAdapter};
use crate::schedule::center::ReminderCenter;
use crate::schedule::reminder::{ReminderId, ReminderPolicy};
use crate::service::budget_service;
use crate::service::collaborators::{AddRecordGate, CancellationCatalog};
use crate::sync::reconciler::{apply_op, merge, Reconciler, RemoteOp, SyncStatus};
use crate::sync::remote::RemoteStore;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Caller mistakes surfaced by coordinator mutations.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// No record with this id exists.
    NotFound(SubscriptionId),
    /// `add` was given an id that is already tracked.
    DuplicateId(SubscriptionId),
    /// The add gate refused another active record.
    LimitReached { active_count: usize },
    Validation(SubscriptionValidationError),
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "subscription not found: {id}"),
            Self::DuplicateId(id) => write!(f, "subscription already exists: {id}"),
            Self::LimitReached { active_count } => write!(
                f,
                "subscription limit reached with {active_count} active subscriptions"
            ),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) | Self::DuplicateId(_) | Self::LimitReached { .. } => None,
        }
    }
}

impl From<SubscriptionValidationError> for CoordinatorError {
    fn from(value: SubscriptionValidationError) -> Self {
        Self::Validation(value)
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

const COST_EPSILON: f64 = 1e-9;

/// Explicitly constructed collaborators for one coordinator.
pub struct CoordinatorDeps {
    pub records: Arc<dyn RecordStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub reminders: Arc<dyn ReminderCenter>,
    pub gate: Arc<dyn AddRecordGate>,
    pub catalog: Arc<dyn CancellationCatalog>,
    pub clock: Arc<dyn Clock>,
    pub policy: ReminderPolicy,
    /// Used when no budget settings were ever persisted.
    pub default_budget: BudgetSettings,
}

/// Summary of one refresh pass.
///
/// Convergence pushes run as tracked jobs; `queued_pushes` counts the
/// operations handed to them. Join them with
/// [`SubscriptionCoordinator::wait_for_pending_pushes`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub record_count: usize,
    pub queued_pushes: usize,
    pub schedule: ScheduleReport,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    records: Vec<Subscription>,
    pending: HashSet<SubscriptionId>,
    budget: BudgetSettings,
    usage: UsageResponses,
    /// Ids mutated while a refresh is fetching; `None` outside a refresh.
    touched_during_refresh: Option<HashSet<SubscriptionId>>,
    /// Monthly total at the last budget evaluation.
    evaluated_total: Option<f64>,
}

impl CoordinatorState {
    fn position(&self, id: SubscriptionId) -> Option<usize> {
        self.records.iter().position(|record| record.id == id)
    }

    fn active_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_active).count()
    }

    fn active_records(&self) -> Vec<Subscription> {
        self.records
            .iter()
            .filter(|record| record.is_active)
            .cloned()
            .collect()
    }

    /// Whether `op` describes the current local version of its record.
    fn is_current(&self, op: &RemoteOp) -> bool {
        match op {
            RemoteOp::Upsert(pushed) => self
                .records
                .iter()
                .any(|record| record.id == pushed.id && record == pushed),
            RemoteOp::Delete(id) => self.position(*id).is_none(),
        }
    }
}

/// Owner of the canonical subscription set.
pub struct SubscriptionCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
    records: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsStore>,
    reconciler: Reconciler,
    scheduler: SchedulerAdapter,
    gate: Arc<dyn AddRecordGate>,
    catalog: Arc<dyn CancellationCatalog>,
    clock: Arc<dyn Clock>,
    push_jobs: Mutex<JoinSet<()>>,
    refresh_gate: Mutex<()>,
}

impl SubscriptionCoordinator {
    /// Builds a coordinator with an empty record set.
    ///
    /// Call [`Self::load_from_store`] to hydrate it from the local cache.
    pub fn new(deps: CoordinatorDeps) -> Self {
        let state = CoordinatorState {
            budget: deps.default_budget,
            ..CoordinatorState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            records: deps.records,
            settings: deps.settings,
            reconciler: Reconciler::new(deps.remote),
            scheduler: SchedulerAdapter::new(deps.reminders, deps.policy, Arc::clone(&deps.clock)),
            gate: deps.gate,
            catalog: deps.catalog,
            clock: deps.clock,
            push_jobs: Mutex::new(JoinSet::new()),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Replaces in-memory state with the local snapshot and reschedules.
    ///
    /// A missing or unreadable snapshot yields an empty set.
    pub async fn load_from_store(&self) -> usize {
        let mut state = self.state.lock().await;

        let mut records = match self.records.load() {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(err) => {
                error!("event=coordinator_load module=coordinator status=error error={err}");
                Vec::new()
            }
        };
        dedupe_by_id(&mut records);
        sort_canonical(&mut records);
        state.records = records;
        state.pending.clear();

        match self.settings.load_budget_settings() {
            Ok(Some(budget)) => state.budget = budget,
            Ok(None) => {}
            Err(err) => {
                warn!("event=budget_load module=coordinator status=error error={err}");
            }
        }
        match self.settings.load_usage_responses() {
            Ok(responses) => state.usage = responses.unwrap_or_default(),
            Err(err) => {
                warn!("event=usage_load module=coordinator status=error error={err}");
                state.usage = UsageResponses::default();
            }
        }
        state.evaluated_total = None;

        self.scheduler.reconcile(&state.active_records()).await;
        self.scheduler.reconcile_usage_checks(&state.records).await;
        info!(
            "event=coordinator_load module=coordinator status=ok count={}",
            state.records.len()
        );
        state.records.len()
    }

    /// Adds a new subscription.
    ///
    /// # Errors
    /// - `LimitReached` when the add gate refuses another active record.
    /// - `Validation` when the record breaks model invariants.
    /// - `DuplicateId` when the id is already tracked.
    pub async fn add(&self, mut record: Subscription) -> CoordinatorResult<Subscription> {
        let mut state = self.state.lock().await;
        let active_count = state.active_count();
        if !self.gate.can_add_record(active_count) {
            info!(
                "event=record_add module=coordinator status=rejected reason=limit active_count={active_count}"
            );
            return Err(CoordinatorError::LimitReached { active_count });
        }
        record.validate()?;
        if state.position(record.id).is_some() {
            return Err(CoordinatorError::DuplicateId(record.id));
        }

        let now = self.clock.now();
        record.created_at = now;
        record.touch(now);
        state.records.push(record.clone());
        self.commit(&mut state, RemoteOp::Upsert(record.clone())).await;
        info!("event=record_add module=coordinator status=ok record_id={}", record.id);
        Ok(record)
    }

    /// Replaces an existing subscription's fields, keeping id and `created_at`.
    pub async fn update(&self, mut record: Subscription) -> CoordinatorResult<Subscription> {
        record.validate()?;
        let mut state = self.state.lock().await;
        let index = state
            .position(record.id)
            .ok_or(CoordinatorError::NotFound(record.id))?;

        record.created_at = state.records[index].created_at;
        record.touch(self.clock.now());
        state.records[index] = record.clone();
        self.commit(&mut state, RemoteOp::Upsert(record.clone())).await;
        info!("event=record_update module=coordinator status=ok record_id={}", record.id);
        Ok(record)
    }

    /// Soft-deletes a subscription.
    pub async fn delete(&self, id: SubscriptionId) -> CoordinatorResult<Subscription> {
        let now = self.clock.now();
        self.mutate(id, "record_delete", |record| record.soft_delete(now))
            .await
    }

    /// Reverses a soft delete.
    pub async fn reactivate(&self, id: SubscriptionId) -> CoordinatorResult<Subscription> {
        let now = self.clock.now();
        self.mutate(id, "record_reactivate", |record| record.reactivate(now))
            .await
    }

    /// Rolls `next_billing_date` forward by one billing cycle.
    pub async fn mark_renewed(&self, id: SubscriptionId) -> CoordinatorResult<Subscription> {
        let now = self.clock.now();
        self.mutate(id, "record_renew", |record| {
            record.advance_to_next_billing_date(now)
        })
        .await
    }

    /// Removes a subscription for good, locally and remotely.
    pub async fn permanent_delete(&self, id: SubscriptionId) -> CoordinatorResult<()> {
        let mut state = self.state.lock().await;
        let index = state.position(id).ok_or(CoordinatorError::NotFound(id))?;
        state.records.remove(index);
        if state.usage.forget(id) {
            self.persist_usage(&state.usage);
        }
        self.commit(&mut state, RemoteOp::Delete(id)).await;
        info!("event=record_purge module=coordinator status=ok record_id={id}");
        Ok(())
    }

    /// Clears every local record and reminder. Remote data is left untouched.
    pub async fn reset_all_data(&self) {
        let mut state = self.state.lock().await;
        self.scheduler.cancel_all().await;
        state.records.clear();
        state.pending.clear();
        state.usage = UsageResponses::default();
        state.evaluated_total = None;
        self.persist(&state.records);
        self.persist_usage(&state.usage);
        info!("event=coordinator_reset module=coordinator status=ok");
    }

    /// Runs one full reconciliation pass against the remote store.
    ///
    /// Outstanding push jobs are joined first. The remote is checked and
    /// fetched without holding the state lock, so mutations and queries
    /// proceed meanwhile. The fetched set is then merged against the state
    /// as it is at that moment. Convergence pushes run as tracked jobs. On
    /// any remote failure the local set is kept as-is and reminders are
    /// still reconciled.
    pub async fn refresh_data(&self) -> SyncReport {
        let _refresh = self.refresh_gate.lock().await;
        self.wait_for_pending_pushes().await;

        self.state.lock().await.touched_during_refresh = Some(HashSet::new());
        let pulled = self.reconciler.pull().await;

        let mut state = self.state.lock().await;
        let touched = state.touched_during_refresh.take().unwrap_or_default();
        let mut queued_pushes = 0;
        let status = match pulled {
            Ok(remote) => {
                let mut authoritative = state.pending.clone();
                authoritative.extend(touched.iter().copied());
                let outcome = merge(&state.records, &remote, &authoritative);
                let op_ids: HashSet<SubscriptionId> =
                    outcome.remote_ops.iter().map(RemoteOp::record_id).collect();
                state.records = outcome.merged;

                if self.persist(&state.records) {
                    state.pending = op_ids;
                    queued_pushes = outcome.remote_ops.len();
                    self.spawn_push(outcome.remote_ops).await;
                } else {
                    warn!(
                        "event=sync_push module=coordinator status=skipped reason=persist_failed op_count={}",
                        outcome.remote_ops.len()
                    );
                    state.pending.extend(op_ids);
                }
                SyncStatus::Merged
            }
            Err(status) => status,
        };

        let schedule = self.scheduler.reconcile(&state.active_records()).await;
        self.scheduler.reconcile_usage_checks(&state.records).await;
        self.evaluate_budget(&mut state, true).await;

        info!(
            "event=coordinator_refresh module=coordinator status=done merged={} count={} queued={queued_pushes} touched={}",
            status == SyncStatus::Merged,
            state.records.len(),
            touched.len()
        );
        SyncReport {
            status,
            record_count: state.records.len(),
            queued_pushes,
            schedule,
        }
    }

    /// Waits for every push job spawned so far.
    pub async fn wait_for_pending_pushes(&self) {
        let mut jobs = std::mem::take(&mut *self.push_jobs.lock().await);
        while let Some(joined) = jobs.join_next().await {
            if let Err(err) = joined {
                error!("event=sync_push module=coordinator status=error error={err}");
            }
        }
    }

    /// Persists new budget settings and re-evaluates the alert.
    pub async fn update_budget_settings(&self, mut settings: BudgetSettings) -> BudgetSettings {
        settings.set_notify_percentage(settings.notify_at_percentage);
        let mut state = self.state.lock().await;
        state.budget = settings.clone();
        if let Err(err) = self.settings.save_budget_settings(&settings) {
            error!("event=budget_save module=coordinator status=error error={err}");
        }
        self.evaluate_budget(&mut state, true).await;
        settings
    }

    /// Records the answer to a usage-check prompt and returns the record's
    /// not-used count.
    ///
    /// From the second "not used" answer on, a cancellation hint is
    /// scheduled unless the record is essential or inactive. The record
    /// itself is not modified.
    pub async fn record_usage_response(
        &self,
        id: SubscriptionId,
        used: bool,
    ) -> CoordinatorResult<u32> {
        let mut state = self.state.lock().await;
        let index = state.position(id).ok_or(CoordinatorError::NotFound(id))?;
        let record = state.records[index].clone();

        let count = state.usage.record(id, used);
        self.persist_usage(&state.usage);
        let suggested = !used
            && state.usage.should_suggest_cancellation(id)
            && self.scheduler.suggest_cancellation(&record).await;
        info!(
            "event=usage_response module=coordinator status=ok record_id={id} used={used} not_used_count={count} suggested={suggested}"
        );
        Ok(count)
    }

    /// Ids whose latest usage answer was "not used", sorted.
    pub async fn not_used_subscriptions(&self) -> Vec<SubscriptionId> {
        let state = self.state.lock().await;
        state.usage.not_used.iter().copied().collect()
    }

    pub async fn not_used_count(&self, id: SubscriptionId) -> u32 {
        self.state.lock().await.usage.not_used_count(id)
    }

    /// All records in canonical order, inactive ones included.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.records.clone()
    }

    pub async fn active_subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().await.active_records()
    }

    pub async fn inactive_subscriptions(&self) -> Vec<Subscription> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .filter(|record| !record.is_active)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        let state = self.state.lock().await;
        state.records.iter().find(|record| record.id == id).cloned()
    }

    /// Ids whose latest local change is not yet confirmed remotely, sorted.
    pub async fn pending_uploads(&self) -> Vec<SubscriptionId> {
        let state = self.state.lock().await;
        let mut ids: Vec<SubscriptionId> = state.pending.iter().copied().collect();
        ids.sort();
        ids
    }

    pub async fn budget_settings(&self) -> BudgetSettings {
        self.state.lock().await.budget.clone()
    }

    pub async fn budget_status(&self) -> Option<BudgetStatus> {
        let state = self.state.lock().await;
        budget_service::budget_status(&state.budget, &state.records)
    }

    pub async fn budget_impact(&self, amount: f64, cycle: BillingCycle) -> Option<BudgetImpact> {
        let state = self.state.lock().await;
        budget_service::budget_impact(&state.budget, &state.records, amount, cycle)
    }

    pub async fn total_monthly_cost(&self) -> f64 {
        budget_service::total_monthly_cost(&self.state.lock().await.records)
    }

    pub async fn total_yearly_cost(&self) -> f64 {
        budget_service::total_yearly_cost(&self.state.lock().await.records)
    }

    pub async fn upcoming_renewals(&self) -> Vec<Subscription> {
        let now = self.clock.now();
        budget_service::upcoming_renewals(&self.state.lock().await.records, now)
    }

    /// Looks up where the record's service can be cancelled.
    pub async fn cancellation_reference(
        &self,
        id: SubscriptionId,
    ) -> CoordinatorResult<Option<String>> {
        let record = self.get(id).await.ok_or(CoordinatorError::NotFound(id))?;
        Ok(self.catalog.find_cancellation_reference(&record.service_name))
    }

    /// Reminder ids currently scheduled by this coordinator.
    pub async fn scheduled_reminders(&self) -> Vec<ReminderId> {
        self.scheduler.scheduled_ids().await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn mutate<F>(
        &self,
        id: SubscriptionId,
        event: &'static str,
        change: F,
    ) -> CoordinatorResult<Subscription>
    where
        F: FnOnce(&mut Subscription),
    {
        let mut state = self.state.lock().await;
        let index = state.position(id).ok_or(CoordinatorError::NotFound(id))?;
        change(&mut state.records[index]);
        let record = state.records[index].clone();
        self.commit(&mut state, RemoteOp::Upsert(record.clone())).await;
        info!("event={event} module=coordinator status=ok record_id={id}");
        Ok(record)
    }

    /// Runs the post-mutation pipeline: persist, mark pending, reschedule,
    /// push, budget check.
    async fn commit(&self, state: &mut CoordinatorState, op: RemoteOp) {
        sort_canonical(&mut state.records);
        let persisted = self.persist(&state.records);
        state.pending.insert(op.record_id());
        if let Some(touched) = state.touched_during_refresh.as_mut() {
            touched.insert(op.record_id());
        }

        match &op {
            RemoteOp::Upsert(record) => {
                self.scheduler.reconcile_record(record).await;
            }
            RemoteOp::Delete(id) => {
                self.scheduler.cancel_record(*id).await;
            }
        }
        self.scheduler.reconcile_usage_checks(&state.records).await;

        if persisted {
            self.spawn_push(vec![op]).await;
        } else {
            warn!(
                "event=sync_push module=coordinator status=skipped reason=persist_failed record_id={}",
                op.record_id()
            );
        }
        self.evaluate_budget(state, false).await;
    }

    fn persist(&self, records: &[Subscription]) -> bool {
        match self.records.save(records) {
            Ok(()) => true,
            Err(err) => {
                error!("event=coordinator_persist module=coordinator status=error error={err}");
                false
            }
        }
    }

    fn persist_usage(&self, usage: &UsageResponses) {
        if let Err(err) = self.settings.save_usage_responses(usage) {
            error!("event=usage_save module=coordinator status=error error={err}");
        }
    }

    /// Spawns one tracked job applying `ops` in order.
    ///
    /// Each confirmed op clears its pending mark only if the local record
    /// still matches what was pushed.
    async fn spawn_push(&self, ops: Vec<RemoteOp>) {
        if ops.is_empty() {
            return;
        }
        let remote = Arc::clone(self.reconciler.remote());
        let state = Arc::clone(&self.state);
        let mut jobs = self.push_jobs.lock().await;
        while let Some(finished) = jobs.try_join_next() {
            if let Err(err) = finished {
                error!("event=sync_push module=coordinator status=error error={err}");
            }
        }

        jobs.spawn(async move {
            for op in ops {
                let id = op.record_id();
                match apply_op(remote.as_ref(), &op).await {
                    Ok(()) => {
                        let mut state = state.lock().await;
                        if state.is_current(&op) {
                            state.pending.remove(&id);
                        }
                        info!("event=sync_push module=coordinator status=ok record_id={id}");
                    }
                    Err(err) => warn!(
                        "event=sync_push module=coordinator status=error record_id={id} error_code={}",
                        err.code()
                    ),
                }
            }
        });
    }

    /// Fires the budget alert when over the threshold.
    ///
    /// Unless `force` is set, skipped when the monthly total is unchanged
    /// since the last evaluation.
    async fn evaluate_budget(&self, state: &mut CoordinatorState, force: bool) {
        let total = budget_service::total_monthly_cost(&state.records);
        let unchanged = state
            .evaluated_total
            .is_some_and(|previous| (previous - total).abs() < COST_EPSILON);
        if unchanged && !force {
            return;
        }
        state.evaluated_total = Some(total);
        if let Some(status) = budget_service::should_alert(&state.budget, &state.records) {
            self.scheduler.alert_budget(&status).await;
        }
    }
}

/// Keeps the first occurrence of each id.
fn dedupe_by_id(records: &mut Vec<Subscription>) {
    let mut seen = HashSet::with_capacity(records.len());
    records.retain(|record| seen.insert(record.id));
}
