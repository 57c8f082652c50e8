use rusqlite::Connection;
use subly_core::db::migrations::latest_version;
use subly_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "kv_snapshots");
}

#[test]
fn opening_same_database_twice_keeps_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subly.db");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute(
            "INSERT INTO kv_snapshots (key, value, updated_at) VALUES ('sample', '[]', 0);",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let stored: String = conn_second
        .query_row(
            "SELECT value FROM kv_snapshots WHERE key = 'sample';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stored, "[]");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn snapshot_table_without_value_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("damaged.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE kv_snapshots (key TEXT PRIMARY KEY NOT NULL, updated_at INTEGER NOT NULL);
         PRAGMA user_version = 1;",
    )
    .unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::SnapshotColumnMissing { column } => assert_eq!(column, "value"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn migrated_database_without_snapshot_table_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 1;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    assert!(matches!(err, DbError::MissingSnapshotTable));
    assert_eq!(err.code(), "snapshot_table_missing");
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
