//! Storage layer for the vigil usage tracker.
//!
//! Persists finalized usage sessions to SQLite and serves the rollups
//! the report commands read.
//!
//! # Backends
//!
//! [`Store`] fronts one of two backends:
//!
//! - **File**: the durable store. Every operation opens its own
//!   connection, so a slow write from the tracking loop never stalls a
//!   concurrently running report command; the database runs in WAL
//!   mode for the same reason.
//! - **Memory**: a single kept connection, used when the durable store
//!   cannot be opened. Data recorded on this backend is lost when the
//!   process exits; [`Store::is_fallback`] reports it so callers can
//!   say so.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in ISO 8601 UTC (e.g.
//! `2025-01-15T10:30:00.000Z`) and dates as `YYYY-MM-DD` local
//! calendar days, so lexicographic ordering matches chronological
//! ordering for both. Schema evolution runs through
//! [`migrations::run`]; see that module for the step-by-step layout.
//!
//! A file that fails `PRAGMA quick_check` on open is quarantined:
//! renamed aside with a timestamp suffix (WAL side files included) so
//! tracking continues on a fresh store while the damaged file stays
//! available for inspection.

mod migrations;

pub use migrations::SCHEMA_VERSION;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, params};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_core::{
    CanonicalName, DailyTotal, ProcessId, UsageRecord, ValidationError, local_date_of,
};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A filesystem operation around the database file failed.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The database file failed its integrity check.
    #[error("database failed integrity check: {verdict}")]
    Corrupt { verdict: String },
    /// The database was written by a newer build.
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },
    /// No migration step is defined for the requested version.
    #[error("no migration defined for schema version {version}")]
    UnknownMigration { version: i32 },
    /// A stored timestamp failed to parse.
    #[error("invalid timestamp in database: {value}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored date failed to parse.
    #[error("invalid date in database: {value}")]
    InvalidDate { value: String },
    /// A stored record id failed to parse.
    #[error("invalid record id in database: {value}")]
    InvalidId { value: String },
    /// A stored application name failed validation.
    #[error("invalid application name in database: {0}")]
    InvalidName(#[from] ValidationError),
}

enum Backend {
    File { path: PathBuf },
    Memory { conn: Mutex<Connection> },
}

/// Handle to the usage session store.
pub struct Store {
    backend: Backend,
    schema_version: i32,
}

impl Store {
    /// Opens (or creates) the durable store at `path`.
    ///
    /// An existing file is integrity-checked first; a damaged file is
    /// quarantined and replaced by a fresh store. Migrations then run
    /// up to the supported schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        if path.exists() {
            if let Err(error) = check_integrity(&path) {
                warn!(
                    path = %path.display(),
                    %error,
                    "integrity check failed, quarantining database"
                );
                quarantine(&path)?;
            }
        }

        let mut conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL persists in the file; the tracking loop's writes and a
        // concurrent report command no longer block each other.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let schema_version = migrations::run(&mut conn)?;
        debug!(path = %path.display(), schema_version, "opened usage store");

        Ok(Self {
            backend: Backend::File { path },
            schema_version,
        })
    }

    /// Opens an in-memory store with the same schema.
    ///
    /// Used as the degraded backend and in tests. The data is gone
    /// when the store is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        let schema_version = migrations::run(&mut conn)?;
        Ok(Self {
            backend: Backend::Memory {
                conn: Mutex::new(conn),
            },
            schema_version,
        })
    }

    /// Opens the durable store, degrading to the in-memory backend
    /// when the file cannot be used. Only a failure of both is an
    /// error.
    pub fn open_or_fallback(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        match Self::open(path.as_ref()) {
            Ok(store) => Ok(store),
            Err(error) => {
                warn!(
                    path = %path.as_ref().display(),
                    %error,
                    "usage store unavailable, tracking in memory for this session"
                );
                Self::open_in_memory()
            }
        }
    }

    /// True when running on the volatile in-memory backend.
    pub fn is_fallback(&self) -> bool {
        matches!(self.backend, Backend::Memory { .. })
    }

    /// Path of the durable database file, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File { path } => Some(path),
            Backend::Memory { .. } => None,
        }
    }

    /// Effective schema version of the opened store.
    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    /// Persists a finalized session, replacing any previous row with
    /// the same id.
    ///
    /// Fields are validated on the way in: the date is clamped to
    /// today, the duration to `session_cap`, and when an end time is
    /// present the stored duration is the tighter of the accumulator
    /// and the wall-clock span.
    pub fn insert_record(
        &self,
        record: &UsageRecord,
        session_cap: chrono::Duration,
    ) -> Result<(), StoreError> {
        self.insert_record_at(record, session_cap, Utc::now())
    }

    fn insert_record_at(
        &self,
        record: &UsageRecord,
        session_cap: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let today = local_date_of(now);
        let date = record.date.min(today);
        let cap_ms = session_cap.num_milliseconds().max(0);
        let mut duration_ms = record.duration_ms.clamp(0, cap_ms);
        if let Some(ended_at) = record.ended_at {
            let span_ms = (ended_at - record.started_at).num_milliseconds().max(0);
            duration_ms = duration_ms.min(span_ms);
        }
        if date != record.date || duration_ms != record.duration_ms {
            debug!(id = %record.id, "clamped session fields during write validation");
        }
        let label = if record.window_title.is_empty() {
            None
        } else {
            Some(record.window_title.as_str())
        };

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "
                INSERT OR REPLACE INTO usage_sessions
                (id, date, name, name_key, label, started_at, ended_at, duration_ms, was_focused, updated_at, pid)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ",
                params![
                    record.id.to_string(),
                    date.to_string(),
                    record.name.as_str(),
                    record.name.key(),
                    label,
                    format_timestamp(record.started_at),
                    record.ended_at.map(format_timestamp),
                    duration_ms,
                    record.held_focus(),
                    format_timestamp(record.updated_at),
                    record.pid.map(|pid| i64::from(pid.0)),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Per-day, per-application totals for an inclusive date range,
    /// read from the rollup view.
    ///
    /// A reversed range yields no rows. Malformed rows are skipped
    /// with a warning; the scan always completes.
    pub fn daily_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyTotal>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT date, name, label, total_ms
                FROM daily_usage
                WHERE date >= ?1 AND date <= ?2
                ORDER BY date ASC, name_key ASC
                ",
            )?;
            let rows = stmt.query_map(params![from.to_string(), to.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut totals = Vec::new();
            for row in rows {
                let parsed = match row {
                    Ok(raw) => parse_total_row(raw),
                    Err(error) => Err(StoreError::from(error)),
                };
                match parsed {
                    Ok(total) => totals.push(total),
                    Err(error) => warn!(%error, "skipping malformed rollup row"),
                }
            }
            Ok(totals)
        })
    }

    /// Raw session rows attributed to one local date, oldest first.
    ///
    /// Malformed rows are skipped with a warning; the scan always
    /// completes.
    pub fn records_for_date(&self, date: NaiveDate) -> Result<Vec<UsageRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "
                SELECT id, date, name, label, started_at, ended_at, duration_ms, was_focused, updated_at, pid
                FROM usage_sessions
                WHERE date = ?1
                ORDER BY started_at ASC, id ASC
                ",
            )?;
            let rows = stmt.query_map(params![date.to_string()], |row| {
                Ok(SessionRow {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    name: row.get(2)?,
                    label: row.get(3)?,
                    started_at: row.get(4)?,
                    ended_at: row.get(5)?,
                    duration_ms: row.get(6)?,
                    was_focused: row.get(7)?,
                    updated_at: row.get(8)?,
                    pid: row.get(9)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                let parsed = match row {
                    Ok(raw) => parse_session_row(raw),
                    Err(error) => Err(StoreError::from(error)),
                };
                match parsed {
                    Ok(record) => records.push(record),
                    Err(error) => warn!(%error, "skipping malformed session row"),
                }
            }
            Ok(records)
        })
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM usage_sessions", [], |row| row.get(0))?)
        })
    }

    /// Timestamp of the most recently updated session, if any.
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.with_conn(|conn| {
            let value: Option<String> =
                conn.query_row("SELECT MAX(updated_at) FROM usage_sessions", [], |row| {
                    row.get(0)
                })?;
            value.map(|raw| parse_timestamp(&raw)).transpose()
        })
    }

    /// Deletes sessions older than `horizon_days` and returns how many
    /// rows went away.
    ///
    /// The delete commits first; on the file backend, `VACUUM` then
    /// reclaims the space outside any transaction.
    pub fn prune(&self, horizon_days: u32) -> Result<usize, StoreError> {
        self.prune_at(horizon_days, Utc::now())
    }

    fn prune_at(&self, horizon_days: u32, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let horizon = local_date_of(now) - chrono::Duration::days(i64::from(horizon_days));
        let deleted = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM usage_sessions WHERE date < ?1",
                params![horizon.to_string()],
            )?;
            tx.commit()?;
            Ok(deleted)
        })?;

        if deleted > 0 && !self.is_fallback() {
            self.with_conn(|conn| {
                conn.execute_batch("VACUUM")?;
                Ok(())
            })?;
        }
        if deleted > 0 {
            debug!(deleted, horizon = %horizon, "pruned stored sessions");
        }
        Ok(deleted)
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match &self.backend {
            Backend::File { path } => {
                let mut conn = Connection::open(path)?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                op(&mut conn)
            }
            Backend::Memory { conn } => {
                let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                op(&mut guard)
            }
        }
    }
}

struct SessionRow {
    id: String,
    date: String,
    name: String,
    label: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    duration_ms: i64,
    was_focused: bool,
    updated_at: String,
    pid: Option<i64>,
}

fn parse_total_row(
    (date, name, label, total_ms): (String, String, Option<String>, i64),
) -> Result<DailyTotal, StoreError> {
    Ok(DailyTotal {
        date: parse_date(&date)?,
        name: CanonicalName::new(name)?,
        label,
        total_ms: total_ms.max(0),
    })
}

fn parse_session_row(row: SessionRow) -> Result<UsageRecord, StoreError> {
    let id = Uuid::parse_str(&row.id).map_err(|_| StoreError::InvalidId {
        value: row.id.clone(),
    })?;
    let name = CanonicalName::new(row.name)?;
    let date = parse_date(&row.date)?;
    let started_at = parse_timestamp(&row.started_at)?;
    let ended_at = row.ended_at.as_deref().map(parse_timestamp).transpose()?;
    let updated_at = parse_timestamp(&row.updated_at)?;
    let pid = row
        .pid
        .and_then(|pid| u32::try_from(pid).ok())
        .map(ProcessId);

    Ok(UsageRecord::from_stored(
        id,
        name,
        String::new(),
        row.label.unwrap_or_default(),
        pid,
        date,
        started_at,
        ended_at,
        row.duration_ms.max(0),
        updated_at,
        row.was_focused,
    ))
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    value.parse().map_err(|_| StoreError::InvalidDate {
        value: value.to_string(),
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| StoreError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn check_integrity(path: &Path) -> Result<(), StoreError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(StoreError::Corrupt { verdict })
    }
}

fn quarantine(path: &Path) -> Result<(), StoreError> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let target = sibling(path, &format!(".corrupt-{stamp}"));
    fs::rename(path, &target).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // WAL side files would otherwise be replayed into the fresh store.
    for suffix in ["-wal", "-shm"] {
        let side = sibling(path, suffix);
        if side.exists() {
            if let Err(error) = fs::rename(&side, sibling(&target, suffix)) {
                warn!(path = %side.display(), %error, "failed to move database side file");
            }
        }
    }

    warn!(
        from = %path.display(),
        to = %target.display(),
        "quarantined damaged database"
    );
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
