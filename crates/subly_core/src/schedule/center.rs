//! Reminder side-effect contract and in-process implementation.

use crate::schedule::reminder::{ReminderId, ScheduleEntry};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Reminder delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderError {
    /// User has not granted notification permission.
    Unauthorized,
    /// Platform rejected the request.
    Rejected(String),
}

impl Display for ReminderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "reminders are not authorized"),
            Self::Rejected(message) => write!(f, "reminder rejected: {message}"),
        }
    }
}

impl Error for ReminderError {}

/// Platform reminder facility (local notifications, timers, ...).
///
/// Adding an entry whose id is already pending replaces it.
#[async_trait]
pub trait ReminderCenter: Send + Sync {
    async fn is_authorized(&self) -> bool;
    async fn add(&self, entry: ScheduleEntry) -> Result<(), ReminderError>;
    async fn remove(&self, ids: &[ReminderId]);
    async fn remove_all(&self);
    async fn pending(&self) -> Vec<ScheduleEntry>;
}

/// Reminder center that keeps pending entries in memory.
#[derive(Debug)]
pub struct InMemoryReminderCenter {
    entries: Mutex<BTreeMap<ReminderId, ScheduleEntry>>,
    authorized: AtomicBool,
}

impl Default for InMemoryReminderCenter {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            authorized: AtomicBool::new(true),
        }
    }
}

impl InMemoryReminderCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<ReminderId, ScheduleEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pending ids in key order.
    pub fn pending_ids(&self) -> Vec<ReminderId> {
        self.entries().keys().copied().collect()
    }
}

#[async_trait]
impl ReminderCenter for InMemoryReminderCenter {
    async fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn add(&self, entry: ScheduleEntry) -> Result<(), ReminderError> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(ReminderError::Unauthorized);
        }
        self.entries().insert(entry.id, entry);
        Ok(())
    }

    async fn remove(&self, ids: &[ReminderId]) {
        let mut entries = self.entries();
        for id in ids {
            entries.remove(id);
        }
    }

    async fn remove_all(&self) {
        self.entries().clear();
    }

    async fn pending(&self) -> Vec<ScheduleEntry> {
        self.entries().values().cloned().collect()
    }
}
