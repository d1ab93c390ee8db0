//! Schema migrations tracked through SQLite's `user_version` pragma.
//!
//! Each step runs in its own transaction and bumps `user_version` as
//! part of that transaction, so a crash mid-migration leaves the store
//! at the last completed version. Steps are written to be idempotent
//! (`IF NOT EXISTS` DDL, column probes before `ALTER TABLE`) so a
//! replayed step is harmless.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::StoreError;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: i32 = 3;

/// Runs pending migrations and returns the effective schema version.
///
/// A failed step is logged and migration stops there; the store keeps
/// operating at the last version that applied cleanly. A database
/// written by a newer build is refused outright so the file is never
/// touched by code that does not understand it.
pub fn run(conn: &mut Connection) -> Result<i32, StoreError> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(current);
    }

    let mut effective = current;
    for version in (current + 1)..=SCHEMA_VERSION {
        match apply_step(conn, version) {
            Ok(()) => {
                debug!(version, "applied schema migration");
                effective = version;
            }
            Err(error) => {
                warn!(
                    version,
                    %error,
                    "schema migration failed, store stays at version {effective}"
                );
                break;
            }
        }
    }
    Ok(effective)
}

fn apply_step(conn: &mut Connection, version: i32) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    match version {
        1 => {
            tx.execute_batch(
                "
                -- Fact table: one row per finalized usage session.
                -- date: local calendar date ('2025-01-15'), attribution day
                -- name_key: case-insensitive merge key for the canonical name
                -- label: last window title, presentation hint only
                -- timestamps: ISO 8601 UTC, lexicographic order == chronological
                CREATE TABLE IF NOT EXISTS usage_sessions (
                    id TEXT PRIMARY KEY,
                    date TEXT NOT NULL,
                    name TEXT NOT NULL,
                    name_key TEXT NOT NULL,
                    label TEXT,
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    duration_ms INTEGER NOT NULL DEFAULT 0,
                    was_focused INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_usage_sessions_date ON usage_sessions(date);
                CREATE INDEX IF NOT EXISTS idx_usage_sessions_name_key ON usage_sessions(name_key);
                ",
            )?;
        }
        2 => {
            tx.execute_batch(
                "
                -- Rollup consumed by reports: per-day, per-application totals.
                CREATE VIEW IF NOT EXISTS daily_usage AS
                SELECT
                    date,
                    name_key,
                    MAX(name) AS name,
                    MAX(label) AS label,
                    SUM(duration_ms) AS total_ms,
                    MAX(updated_at) AS updated_at
                FROM usage_sessions
                GROUP BY date, name_key;
                ",
            )?;
        }
        3 => {
            if !column_exists(&tx, "usage_sessions", "pid")? {
                tx.execute_batch("ALTER TABLE usage_sessions ADD COLUMN pid INTEGER;")?;
            }
        }
        other => {
            return Err(StoreError::UnknownMigration { version: other });
        }
    }
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;
    Ok(())
}

fn column_exists(
    conn: &rusqlite::Transaction<'_>,
    table: &str,
    column: &str,
) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
