//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::StorageResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_event_records(conn)?;
    }
    if current_version < 2 {
        migrate_v2_status_index(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: event records table.
///
/// AUTOINCREMENT keeps ids strictly increasing even after the newest row is
/// deleted, which flush ordering relies on.
fn migrate_v1_event_records(conn: &Connection) -> StorageResult<()> {
    info!("Applying migration v1: event records");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS event_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            category TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    record_migration(conn, 1, "event_records")
}

/// V2: index for status-filtered, id-ordered selection.
fn migrate_v2_status_index(conn: &Connection) -> StorageResult<()> {
    info!("Applying migration v2: status index");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_event_records_status_id
            ON event_records(status, id);
        ",
    )?;

    record_migration(conn, 2, "event_records_status_index")
}
