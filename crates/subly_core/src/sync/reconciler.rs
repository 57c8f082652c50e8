//! Last-writer-wins reconciliation between the local cache and the remote
//! store.
//!
//! # Responsibility
//! - Merge a local set, a remote set and the pending-upload ids into one
//!   authoritative set plus the remote operations that converge the remote.
//! - Run one pull pass against a [`RemoteStore`], degrading to local-only on
//!   any failure.
//! - Push convergence operations and report which ids were confirmed.
//!
//! # Invariants
//! - A pending id is never overwritten by a remote read.
//! - Ties on `updated_at` favor the remote copy.
//! - The merged set holds one entry per id, in canonical order.
//! - `merge` is pure and never suspends.

use crate::model::subscription::{sort_canonical, Subscription, SubscriptionId};
use crate::sync::remote::{RemoteError, RemoteStore};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One remote write needed to converge the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    Upsert(Subscription),
    Delete(SubscriptionId),
}

impl RemoteOp {
    pub fn record_id(&self) -> SubscriptionId {
        match self {
            Self::Upsert(record) => record.id,
            Self::Delete(id) => *id,
        }
    }
}

/// Result of a merge: the authoritative set and pending remote writes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeOutcome {
    pub merged: Vec<Subscription>,
    pub remote_ops: Vec<RemoteOp>,
}

/// Merges local and remote sets with last-writer-wins.
///
/// Pending ids are local-authoritative. A pending id absent locally is a
/// pending permanent delete: the remote copy is dropped and a delete is
/// emitted. Local-only records are kept and scheduled for upload.
pub fn merge(
    local: &[Subscription],
    remote: &[Subscription],
    pending: &HashSet<SubscriptionId>,
) -> MergeOutcome {
    let mut unprocessed: HashMap<SubscriptionId, &Subscription> =
        local.iter().map(|record| (record.id, record)).collect();
    let mut merged = Vec::with_capacity(local.len().max(remote.len()));
    let mut remote_ops = Vec::new();
    let mut seen_remote: HashSet<SubscriptionId> = HashSet::with_capacity(remote.len());

    for remote_record in remote {
        if !seen_remote.insert(remote_record.id) {
            continue;
        }
        let local_record = unprocessed.remove(&remote_record.id);

        match (pending.contains(&remote_record.id), local_record) {
            (true, Some(local_record)) => {
                merged.push(local_record.clone());
                remote_ops.push(RemoteOp::Upsert(local_record.clone()));
            }
            (true, None) => remote_ops.push(RemoteOp::Delete(remote_record.id)),
            (false, Some(local_record)) => {
                if local_record.updated_at > remote_record.updated_at {
                    merged.push(local_record.clone());
                    remote_ops.push(RemoteOp::Upsert(local_record.clone()));
                } else {
                    merged.push(remote_record.clone());
                }
            }
            (false, None) => merged.push(remote_record.clone()),
        }
    }

    // Iterate `local` rather than the map to keep upload order stable.
    for record in local {
        if unprocessed.remove(&record.id).is_some() {
            merged.push(record.clone());
            remote_ops.push(RemoteOp::Upsert(record.clone()));
        }
    }

    sort_canonical(&mut merged);
    MergeOutcome { merged, remote_ops }
}

/// How a pull pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// Remote fetched and merged.
    Merged,
    /// Availability check failed; nothing fetched.
    Offline,
    /// Check passed but the fetch failed.
    FetchFailed(RemoteError),
}

/// Result of one pull pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub merged: Vec<Subscription>,
    pub remote_ops: Vec<RemoteOp>,
}

impl SyncOutcome {
    pub fn is_merged(&self) -> bool {
        self.status == SyncStatus::Merged
    }
}

/// Outcome of pushing convergence operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    pub confirmed: Vec<SubscriptionId>,
    pub failed: Vec<(SubscriptionId, RemoteError)>,
}

/// Drives merge passes against one remote store.
#[derive(Clone)]
pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Checks availability and fetches the remote set.
    ///
    /// The error side is the non-merged status to report: `Offline` or
    /// `FetchFailed`. Failures are logged here.
    pub async fn pull(&self) -> Result<Vec<Subscription>, SyncStatus> {
        if !self.remote.check_availability().await {
            warn!("event=sync_pull module=sync status=offline");
            return Err(SyncStatus::Offline);
        }

        match self.remote.fetch_all().await {
            Ok(remote) => {
                info!(
                    "event=sync_pull module=sync status=ok remote_count={}",
                    remote.len()
                );
                Ok(remote)
            }
            Err(err) => {
                warn!(
                    "event=sync_pull module=sync status=error error_code={} error={err}",
                    err.code()
                );
                Err(SyncStatus::FetchFailed(err))
            }
        }
    }

    /// Fetches the remote set and merges it with `local`.
    ///
    /// Never fails: when the remote is unavailable or the fetch errors,
    /// returns `local` unchanged with no operations.
    pub async fn pull_and_merge(
        &self,
        local: Vec<Subscription>,
        pending: &HashSet<SubscriptionId>,
    ) -> SyncOutcome {
        match self.pull().await {
            Ok(remote) => {
                let outcome = merge(&local, &remote, pending);
                info!(
                    "event=sync_merge module=sync status=ok local_count={} merged_count={} op_count={}",
                    local.len(),
                    outcome.merged.len(),
                    outcome.remote_ops.len()
                );
                SyncOutcome {
                    status: SyncStatus::Merged,
                    merged: outcome.merged,
                    remote_ops: outcome.remote_ops,
                }
            }
            Err(status) => SyncOutcome {
                status,
                merged: local,
                remote_ops: Vec::new(),
            },
        }
    }

    /// Applies `ops` in order. A delete of an absent record is confirmed.
    pub async fn push(&self, ops: &[RemoteOp]) -> PushReport {
        let mut report = PushReport::default();
        for op in ops {
            let id = op.record_id();
            match apply_op(self.remote.as_ref(), op).await {
                Ok(()) => report.confirmed.push(id),
                Err(err) => {
                    warn!(
                        "event=sync_push module=sync status=error record_id={id} error_code={}",
                        err.code()
                    );
                    report.failed.push((id, err));
                }
            }
        }
        if !ops.is_empty() {
            info!(
                "event=sync_push module=sync status=done confirmed={} failed={}",
                report.confirmed.len(),
                report.failed.len()
            );
        }
        report
    }
}

/// Applies one op, folding an absent-record delete into success.
pub(crate) async fn apply_op(
    remote: &dyn RemoteStore,
    op: &RemoteOp,
) -> Result<(), RemoteError> {
    match op {
        RemoteOp::Upsert(record) => remote.upsert(record).await,
        RemoteOp::Delete(id) => match remote.delete(*id).await {
            Err(RemoteError::NotFound(_)) => Ok(()),
            other => other,
        },
    }
}
