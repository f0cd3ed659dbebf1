//! Schema versioning.
//!
//! Each schema step is a SQL file applied exactly once. The step and its
//! row in `_migrations` commit together, so a crash mid-upgrade leaves the
//! database at the previous version.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// `(version, name, sql)`, ascending by version.
const STEPS: &[(u32, &str, &str)] = &[
    (
        1,
        "downloads_and_items",
        include_str!("sql/001_create_downloads.sql"),
    ),
    (
        2,
        "download_url_claims",
        include_str!("sql/002_create_download_urls.sql"),
    ),
    (
        3,
        "runtime_settings",
        include_str!("sql/003_create_runtime_settings.sql"),
    ),
];

/// Highest version this build knows about.
pub fn latest_version() -> u32 {
    STEPS.last().map(|(version, _, _)| *version).unwrap_or(0)
}

/// Highest version recorded in `conn`, or 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Brings `conn` up to [`latest_version`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let from = schema_version(conn)?;
    if from > latest_version() {
        return Err(DatabaseError::Migration {
            version: from,
            reason: format!(
                "database schema is newer than this build (max v{})",
                latest_version()
            ),
        });
    }

    for &(version, name, sql) in STEPS.iter().filter(|(v, _, _)| *v > from) {
        log::info!("Applying schema v{} ({})", version, name);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::Migration {
            version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
    }

    Ok(())
}
