//! SQLite result store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::{Outcome, ProbeResult};

/// On-disk timestamp format. Fixed width, so text ordering is
/// chronological ordering.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Io(#[from] rusqlite::Error),
    #[error("duplicate result for {target} at {timestamp}")]
    Duplicate {
        target: String,
        timestamp: DateTime<Utc>,
    },
    #[error("migration error: {0}")]
    Migration(String),
}

/// Thread-safe append-only store of probe results.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with the embedded schema.
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("schema init failed: {}", e)))?;
        Ok(())
    }

    /// Durably persist one result.
    ///
    /// Fails with `StoreError::Duplicate` if a result for the same
    /// `(target, timestamp)` pair already exists.
    pub fn append(&self, result: &ProbeResult) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO probe_results (target, ts, outcome, latency_ms, detail) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.target,
                result.timestamp.format(TS_FORMAT).to_string(),
                result.outcome.as_str(),
                result.latency_ms,
                result.detail,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate {
                    target: result.target.clone(),
                    timestamp: result.timestamp,
                }
            }
            other => StoreError::Io(other),
        })?;
        Ok(())
    }

    /// Most recent result for a target, or `None` if it was never probed.
    pub fn latest(&self, target: &str) -> Result<Option<ProbeResult>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT target, ts, outcome, latency_ms, detail FROM probe_results
                 WHERE target = ?1 ORDER BY ts DESC LIMIT 1",
                params![target],
                map_result_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Results for a target since the given time, newest first, bounded by
    /// `limit`. Re-issue with a new `since` to page further back.
    pub fn history(
        &self,
        target: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT target, ts, outcome, latency_ms, detail FROM probe_results
             WHERE target = ?1 AND ts >= ?2 ORDER BY ts DESC LIMIT ?3",
        )?;

        let results = stmt
            .query_map(
                params![
                    target,
                    since.format(TS_FORMAT).to_string(),
                    limit as i64,
                ],
                map_result_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Every target that has at least one recorded result.
    pub fn all_targets_with_results(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT target FROM probe_results ORDER BY target")?;

        let targets = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;

        Ok(targets)
    }
}

fn map_result_row(row: &rusqlite::Row<'_>) -> SqlResult<ProbeResult> {
    let ts_str: String = row.get(1)?;
    let outcome_str: String = row.get(2)?;
    let outcome = Outcome::parse(&outcome_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown outcome: {}", outcome_str).into(),
        )
    })?;

    Ok(ProbeResult {
        target: row.get(0)?,
        timestamp: parse_db_time(&ts_str).unwrap_or_else(Utc::now),
        outcome,
        latency_ms: row.get(3)?,
        detail: row.get(4)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TS_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
