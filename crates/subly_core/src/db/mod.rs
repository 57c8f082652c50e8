//! SQLite bootstrap for the local snapshot cache.
//!
//! # Responsibility
//! - Open and configure connections for the key-value snapshot table.
//! - Apply schema migrations, then check the snapshot table is usable.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - A returned connection has `kv_snapshots` with every column the store
//!   reads and writes.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Table holding one serialized blob per namespace key.
pub const SNAPSHOT_TABLE: &str = "kv_snapshots";
/// Columns the snapshot store depends on.
pub const SNAPSHOT_COLUMNS: [&str; 3] = ["key", "value", "updated_at"];

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// File was written by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// `kv_snapshots` is gone although the schema version says it exists.
    MissingSnapshotTable,
    /// `kv_snapshots` exists but lacks a column the store needs.
    SnapshotColumnMissing { column: &'static str },
}

impl DbError {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::UnsupportedSchemaVersion { .. } => "schema_too_new",
            Self::MissingSnapshotTable => "snapshot_table_missing",
            Self::SnapshotColumnMissing { .. } => "snapshot_column_missing",
        }
    }

    /// Classifies an error raised by a snapshot query.
    ///
    /// A dropped snapshot table becomes `MissingSnapshotTable`; anything
    /// else stays a plain SQLite error.
    pub fn from_snapshot_query(err: rusqlite::Error) -> Self {
        let message = match &err {
            rusqlite::Error::SqliteFailure(_, Some(message)) => message.as_str(),
            rusqlite::Error::SqlInputError { msg, .. } => msg.as_str(),
            _ => "",
        };
        if message.starts_with("no such table") && message.contains(SNAPSHOT_TABLE) {
            return Self::MissingSnapshotTable;
        }
        Self::Sqlite(err)
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "snapshot database version {db_version} is newer than this build supports ({latest_supported})"
            ),
            Self::MissingSnapshotTable => write!(f, "table `{SNAPSHOT_TABLE}` is missing"),
            Self::SnapshotColumnMissing { column } => {
                write!(f, "table `{SNAPSHOT_TABLE}` has no `{column}` column")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
