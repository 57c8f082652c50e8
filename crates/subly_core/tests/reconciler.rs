use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use subly_core::sync::remote::RemoteRecord;
use subly_core::{
    merge, InMemoryRemoteStore, OfflineRemoteStore, Reconciler, RemoteError, RemoteOp,
    Subscription, SyncStatus,
};
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

fn record_with(id: Uuid, name: &str, due_in_days: i64, updated_at: DateTime<Utc>) -> Subscription {
    let mut record = Subscription::new(name, 9.99, t0() + Duration::days(due_in_days), t0());
    record.id = id;
    record.updated_at = updated_at;
    record
}

#[test]
fn remote_newer_wins_without_ops() {
    let id = Uuid::new_v4();
    let local = record_with(id, "Local", 5, t0());
    let mut remote = record_with(id, "Remote", 5, t0() + Duration::seconds(1));
    remote.amount = 12.0;

    let outcome = merge(&[local], &[remote.clone()], &HashSet::new());

    assert_eq!(outcome.merged, vec![remote]);
    assert!(outcome.remote_ops.is_empty());
}

#[test]
fn pending_id_keeps_local_even_when_remote_is_newer() {
    let id = Uuid::new_v4();
    let local = record_with(id, "Local", 5, t0());
    let remote = record_with(id, "Remote", 5, t0() + Duration::days(1));

    let outcome = merge(&[local.clone()], &[remote], &HashSet::from([id]));

    assert_eq!(outcome.merged, vec![local.clone()]);
    assert_eq!(outcome.remote_ops, vec![RemoteOp::Upsert(local)]);
}

#[test]
fn local_newer_and_remote_only_records_merge() {
    let a = Uuid::new_v4();
    let local_a = record_with(a, "A", 10, t0());
    let remote_a = record_with(a, "A-old", 10, t0() - Duration::seconds(1));
    let remote_b = record_with(Uuid::new_v4(), "B", 2, t0());

    let outcome = merge(
        &[local_a.clone()],
        &[remote_a, remote_b.clone()],
        &HashSet::new(),
    );

    assert_eq!(outcome.merged, vec![remote_b, local_a.clone()]);
    assert_eq!(outcome.remote_ops, vec![RemoteOp::Upsert(local_a)]);
}

#[test]
fn local_only_records_are_uploaded_in_local_order() {
    let first = record_with(Uuid::new_v4(), "First", 9, t0());
    let second = record_with(Uuid::new_v4(), "Second", 1, t0());

    let outcome = merge(&[first.clone(), second.clone()], &[], &HashSet::new());

    assert_eq!(outcome.merged, vec![second.clone(), first.clone()]);
    assert_eq!(
        outcome.remote_ops,
        vec![RemoteOp::Upsert(first), RemoteOp::Upsert(second)]
    );
}

#[tokio::test]
async fn pull_merges_remote_set() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let adopted = record_with(Uuid::new_v4(), "Remote", 4, t0());
    remote.seed(&adopted);
    let reconciler = Reconciler::new(remote.clone());

    let outcome = reconciler.pull_and_merge(Vec::new(), &HashSet::new()).await;

    assert!(outcome.is_merged());
    assert_eq!(outcome.merged, vec![adopted]);
}

#[tokio::test]
async fn pull_fetches_without_merging() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let stored = record_with(Uuid::new_v4(), "Remote", 4, t0());
    remote.seed(&stored);
    let reconciler = Reconciler::new(remote.clone());

    assert_eq!(reconciler.pull().await, Ok(vec![stored]));

    remote.set_offline(true);
    assert_eq!(reconciler.pull().await, Err(SyncStatus::Offline));
}

#[tokio::test]
async fn pull_degrades_to_local_when_offline() {
    let local = vec![record_with(Uuid::new_v4(), "Local", 3, t0())];
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.seed(&record_with(Uuid::new_v4(), "Remote", 4, t0()));
    remote.set_offline(true);

    let outcome = Reconciler::new(remote)
        .pull_and_merge(local.clone(), &HashSet::new())
        .await;

    assert_eq!(outcome.status, SyncStatus::Offline);
    assert_eq!(outcome.merged, local);
    assert!(outcome.remote_ops.is_empty());

    let outcome = Reconciler::new(Arc::new(OfflineRemoteStore))
        .pull_and_merge(local.clone(), &HashSet::new())
        .await;
    assert_eq!(outcome.status, SyncStatus::Offline);
    assert_eq!(outcome.merged, local);
}

#[tokio::test]
async fn malformed_remote_records_are_dropped_individually() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let valid = record_with(Uuid::new_v4(), "Valid", 4, t0());
    remote.seed(&valid);
    let mut broken = RemoteRecord::encode(&record_with(Uuid::new_v4(), "Broken", 2, t0()));
    broken.category = Some("podcasts".to_string());
    remote.insert_raw(broken);

    let outcome = Reconciler::new(remote)
        .pull_and_merge(Vec::new(), &HashSet::new())
        .await;

    assert_eq!(outcome.merged, vec![valid]);
}

#[tokio::test]
async fn push_confirms_absent_deletes_and_reports_failures() {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let reconciler = Reconciler::new(remote.clone());
    let record = record_with(Uuid::new_v4(), "Push", 4, t0());
    let missing = Uuid::new_v4();

    let report = reconciler
        .push(&[RemoteOp::Upsert(record.clone()), RemoteOp::Delete(missing)])
        .await;
    assert_eq!(report.confirmed, vec![record.id, missing]);
    assert!(report.failed.is_empty());
    assert_eq!(remote.get(record.id), Some(record.clone()));

    remote.set_failure(Some(RemoteError::QuotaExceeded));
    let report = reconciler.push(&[RemoteOp::Upsert(record.clone())]).await;
    assert!(report.confirmed.is_empty());
    assert_eq!(report.failed, vec![(record.id, RemoteError::QuotaExceeded)]);
}

fn pool_id(index: usize) -> Uuid {
    Uuid::from_u128(index as u128 + 1)
}

fn build_side(entries: &[Option<(i64, i64)>]) -> Vec<Subscription> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            entry.map(|(updated, due)| {
                record_with(pool_id(index), "P", due, t0() + Duration::seconds(updated))
            })
        })
        .collect()
}

/// Remote set after applying `ops` the way a remote store would.
fn apply_ops(remote: &[Subscription], ops: &[RemoteOp]) -> Vec<Subscription> {
    let mut applied = remote.to_vec();
    for op in ops {
        applied.retain(|record| record.id != op.record_id());
        if let RemoteOp::Upsert(record) = op {
            applied.push(record.clone());
        }
    }
    applied
}

proptest! {
    #[test]
    fn merge_is_idempotent(
        local in prop::collection::vec(prop::option::of((0i64..4, 0i64..30)), 6),
        remote in prop::collection::vec(prop::option::of((0i64..4, 0i64..30)), 6),
        pending_mask in prop::collection::vec(any::<bool>(), 6),
    ) {
        let local = build_side(&local);
        let remote = build_side(&remote);
        let pending: HashSet<Uuid> = pending_mask
            .iter()
            .enumerate()
            .filter(|(_, flagged)| **flagged)
            .map(|(index, _)| pool_id(index))
            .collect();

        let first = merge(&local, &remote, &pending);
        let second = merge(&first.merged, &remote, &pending);

        prop_assert_eq!(&second.merged, &first.merged);

        // Once the first pass's ops land remotely nothing is left to push.
        let converged_remote = apply_ops(&remote, &first.remote_ops);
        let settled = merge(&first.merged, &converged_remote, &HashSet::new());
        prop_assert_eq!(&settled.merged, &first.merged);
        prop_assert!(settled.remote_ops.is_empty(), "leftover ops: {:?}", settled.remote_ops);

        let ids: HashSet<Uuid> = first.merged.iter().map(|record| record.id).collect();
        prop_assert_eq!(ids.len(), first.merged.len());
        let merged_sorted = first.merged.windows(2).all(|pair| {
            (pair[0].next_billing_date, pair[0].id) <= (pair[1].next_billing_date, pair[1].id)
        });
        prop_assert!(merged_sorted);
    }

    #[test]
    fn pending_ids_never_take_remote_copy(
        local_updated in 0i64..4,
        remote_updated in 0i64..4,
    ) {
        let id = pool_id(0);
        let local = record_with(id, "Local", 3, t0() + Duration::seconds(local_updated));
        let mut remote = record_with(id, "Remote", 3, t0() + Duration::seconds(remote_updated));
        remote.amount = 1.0;

        let outcome = merge(&[local.clone()], &[remote], &HashSet::from([id]));

        prop_assert_eq!(outcome.merged, vec![local]);
    }
}
