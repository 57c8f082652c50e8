//! Local snapshot store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the full subscription set as one blob under a fixed key.
//! - Persist budget settings and usage answers next to it in the same
//!   key-value table.
//!
//! # Invariants
//! - `save` replaces the previous snapshot atomically (one transaction).
//! - Corrupt snapshots are reported, never silently replaced by defaults.
//! - No network access and no retries: a failure is final for that call.

use crate::db::DbError;
use crate::model::budget::BudgetSettings;
use crate::model::subscription::Subscription;
use crate::model::usage::UsageResponses;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

/// Namespace key holding the serialized subscription set.
pub const SUBSCRIPTIONS_KEY: &str = "subscriptions";
/// Namespace key holding serialized budget settings.
pub const BUDGET_SETTINGS_KEY: &str = "budget_settings";
/// Namespace key holding answers to usage-check prompts.
pub const USAGE_RESPONSES_KEY: &str = "usage_responses";

pub type StoreResult<T> = Result<T, StoreError>;

/// Local persistence failure.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Persisted blob could not be decoded.
    Corrupt { key: &'static str, message: String },
    /// Value could not be encoded for persistence.
    Encode(serde_json::Error),
    /// A previous holder of the connection lock panicked.
    Poisoned,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "local snapshot store: {err}"),
            Self::Corrupt { key, message } => {
                write!(f, "corrupt snapshot under key `{key}`: {message}")
            }
            Self::Encode(err) => write!(f, "failed to encode snapshot: {err}"),
            Self::Poisoned => write!(f, "local store connection lock poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::Corrupt { .. } | Self::Poisoned => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from_snapshot_query(value))
    }
}

/// Whole-set snapshot persistence for the canonical record set.
pub trait RecordStore: Send + Sync {
    /// Returns the last saved set, or `None` when nothing was ever saved.
    fn load(&self) -> StoreResult<Option<Vec<Subscription>>>;
    /// Replaces the persisted set with `records`.
    fn save(&self, records: &[Subscription]) -> StoreResult<()>;
}

/// Persistence for user settings kept beside the record set.
pub trait SettingsStore: Send + Sync {
    fn load_budget_settings(&self) -> StoreResult<Option<BudgetSettings>>;
    fn save_budget_settings(&self, settings: &BudgetSettings) -> StoreResult<()>;
    fn load_usage_responses(&self) -> StoreResult<Option<UsageResponses>>;
    fn save_usage_responses(&self, responses: &UsageResponses) -> StoreResult<()>;
}

/// SQLite-backed key-value snapshot store.
///
/// The connection is guarded by a mutex so the store can be shared across
/// async tasks; every call is short and fully local.
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Wraps a connection returned by `db::open_db` / `db::open_db_in_memory`.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn get_blob<T: DeserializeOwned>(&self, key: &'static str) -> StoreResult<Option<T>> {
        let conn = self.connection()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_snapshots WHERE key = ?1;",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| StoreError::Corrupt {
                    key,
                    message: err.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn put_blob<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) -> StoreResult<()> {
        let encoded = serde_json::to_string(value).map_err(StoreError::Encode)?;
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO kv_snapshots (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, encoded, Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl RecordStore for SqliteLocalStore {
    fn load(&self) -> StoreResult<Option<Vec<Subscription>>> {
        let loaded = self.get_blob::<Vec<Subscription>>(SUBSCRIPTIONS_KEY);
        match &loaded {
            Ok(Some(records)) => info!(
                "event=snapshot_load module=store status=ok count={}",
                records.len()
            ),
            Ok(None) => info!("event=snapshot_load module=store status=empty"),
            Err(err) => error!("event=snapshot_load module=store status=error error={err}"),
        }
        loaded
    }

    fn save(&self, records: &[Subscription]) -> StoreResult<()> {
        let saved = self.put_blob(SUBSCRIPTIONS_KEY, records);
        match &saved {
            Ok(()) => info!(
                "event=snapshot_save module=store status=ok count={}",
                records.len()
            ),
            Err(err) => error!("event=snapshot_save module=store status=error error={err}"),
        }
        saved
    }
}

impl SettingsStore for SqliteLocalStore {
    fn load_budget_settings(&self) -> StoreResult<Option<BudgetSettings>> {
        self.get_blob(BUDGET_SETTINGS_KEY)
    }

    fn save_budget_settings(&self, settings: &BudgetSettings) -> StoreResult<()> {
        self.put_blob(BUDGET_SETTINGS_KEY, settings)
    }

    fn load_usage_responses(&self) -> StoreResult<Option<UsageResponses>> {
        self.get_blob(USAGE_RESPONSES_KEY)
    }

    fn save_usage_responses(&self, responses: &UsageResponses) -> StoreResult<()> {
        self.put_blob(USAGE_RESPONSES_KEY, responses)
    }
}
