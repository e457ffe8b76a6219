//! Cache schema definitions and migrations.
//!
//! Provides versioned schema migrations so cache files survive upgrades,
//! and a reserved `meta` table for run-level values such as the global
//! formatter signature.

use rusqlite::Connection;

use crate::error::CacheError;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations.
///
/// # Errors
///
/// Returns an error if migrations fail.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| CacheError::Migration(format!("failed to create migrations table: {e}")))?;

    let current_version = get_current_version(conn)?;
    tracing::debug!(
        current = current_version,
        target = SCHEMA_VERSION,
        "checking cache migrations"
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_current_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(CacheError::Migration(format!("failed to get version: {e}")).into()),
    }
}

/// Record a migration as applied.
fn record_migration(conn: &Connection, version: i32) -> Result<()> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let now_i64 = i64::try_from(now).unwrap_or_default();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)",
        rusqlite::params![version, now_i64],
    )
    .map_err(|e| CacheError::Migration(format!("failed to record migration: {e}")))?;

    Ok(())
}

/// Migration v1: initial schema.
fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::debug!("applying cache migration v1");

    conn.execute_batch(
        r"
        -- Reserved run-level keys (global signature etc.)
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Per-file state after the last successful formatting
        CREATE TABLE IF NOT EXISTS file_state (
            path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            mtime_ns INTEGER NOT NULL
        );

        -- Per-formatter signatures from the last completed run,
        -- kept so invalidation can name the culprit
        CREATE TABLE IF NOT EXISTS formatters (
            name TEXT PRIMARY KEY,
            signature TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| CacheError::Migration(format!("migration v1 failed: {e}")))?;

    record_migration(conn, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Database;

    #[test]
    fn test_migrate_fresh() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(migrate).unwrap();

        let version: i32 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT MAX(version) FROM schema_migrations",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| CacheError::Database(e.to_string()).into())
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(migrate).unwrap();
        db.with_conn(migrate).unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                    row.get(0)
                })
                .map_err(|e| CacheError::Database(e.to_string()).into())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
