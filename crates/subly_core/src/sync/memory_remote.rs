//! In-process remote store.
//!
//! Holds records in their encoded wire shape so reads exercise the same
//! decode path as a networked backend. Availability and failures can be
//! toggled to simulate partitions.

use crate::model::subscription::{Subscription, SubscriptionId};
use crate::sync::remote::{decode_batch, RemoteError, RemoteRecord, RemoteResult, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryRemoteState {
    records: BTreeMap<String, RemoteRecord>,
    offline: bool,
    failure: Option<RemoteError>,
    upsert_calls: usize,
    delete_calls: usize,
}

/// Remote store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    state: Mutex<MemoryRemoteState>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryRemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a record as if written by another device.
    pub fn seed(&self, record: &Subscription) {
        self.insert_raw(RemoteRecord::encode(record));
    }

    /// Stores a raw wire record, valid or not.
    pub fn insert_raw(&self, record: RemoteRecord) {
        self.state().records.insert(record.record_name.clone(), record);
    }

    /// Makes `check_availability` report the backend as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Fails every subsequent call with `failure` until cleared with `None`.
    pub fn set_failure(&self, failure: Option<RemoteError>) {
        self.state().failure = failure;
    }

    /// Returns the decoded record for `id`, if present and valid.
    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state()
            .records
            .get(&id.to_string())
            .and_then(|record| record.decode(Utc::now()).ok())
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    pub fn upsert_calls(&self) -> usize {
        self.state().upsert_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state().delete_calls
    }

    fn check_failure(state: &MemoryRemoteState) -> RemoteResult<()> {
        if state.offline {
            return Err(RemoteError::NetworkUnavailable);
        }
        match &state.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn check_availability(&self) -> bool {
        let state = self.state();
        !state.offline && state.failure.is_none()
    }

    async fn fetch_all(&self) -> RemoteResult<Vec<Subscription>> {
        let state = self.state();
        Self::check_failure(&state)?;
        let raw: Vec<RemoteRecord> = state.records.values().cloned().collect();
        Ok(decode_batch(&raw, Utc::now()))
    }

    async fn upsert(&self, record: &Subscription) -> RemoteResult<()> {
        let mut state = self.state();
        state.upsert_calls += 1;
        Self::check_failure(&state)?;
        state
            .records
            .insert(record.id.to_string(), RemoteRecord::encode(record));
        Ok(())
    }

    async fn delete(&self, id: SubscriptionId) -> RemoteResult<()> {
        let mut state = self.state();
        state.delete_calls += 1;
        Self::check_failure(&state)?;
        state.records.remove(&id.to_string());
        Ok(())
    }
}
