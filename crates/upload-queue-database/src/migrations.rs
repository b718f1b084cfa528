//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema v{current_version} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_upload_records(conn)?;
    }
    if current_version < 2 {
        migrate_v2_timestamp_index(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: one row per queued record, partitioned by storage location.
///
/// `record_key` holds the canonical JSON of the key columns, so two keys are
/// the same row exactly when their column sets and values are equal.
fn migrate_v1_upload_records(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: upload records");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS upload_records (
            location TEXT NOT NULL,
            record_key TEXT NOT NULL,
            timestamp_us INTEGER NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (location, record_key)
        );
        ",
    )?;

    record_migration(conn, 1, "upload_records")?;
    Ok(())
}

/// V2: oldest-first selection per location.
fn migrate_v2_timestamp_index(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: timestamp index");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_upload_records_location_ts
            ON upload_records(location, timestamp_us);
        ",
    )?;

    record_migration(conn, 2, "timestamp_index")?;
    Ok(())
}
