//! Append-only log of recognition events.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS recognition_history (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    identity    TEXT NOT NULL,
    confidence  REAL NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_recorded_at ON recognition_history(recorded_at);
CREATE INDEX IF NOT EXISTS idx_history_identity ON recognition_history(identity, recorded_at);
"#;

/// Shared WHERE clause: ?1 since (inclusive), ?2 until (exclusive), ?3 identity.
const FILTER_SQL: &str = "(?1 IS NULL OR recorded_at >= ?1) \
     AND (?2 IS NULL OR recorded_at < ?2) \
     AND (?3 IS NULL OR identity = ?3)";

const INSERT_SQL: &str =
    "INSERT INTO recognition_history (identity, confidence, recorded_at) VALUES (?1, ?2, ?3)";

/// One recognized (or unrecognized) face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub identity: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn now(identity: impl Into<String>, confidence: f64) -> Self {
        Self {
            identity: identity.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Optional bounds for [`HistoryLog::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub identity: Option<String>,
}

impl HistoryFilter {
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    fn bounds(&self) -> (Option<i64>, Option<i64>) {
        (
            self.since.map(|t| t.timestamp_micros()),
            self.until.map(|t| t.timestamp_micros()),
        )
    }
}

/// Per-identity aggregate over a slice of history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityCount {
    pub identity: String,
    pub events: u64,
    pub mean_confidence: f64,
}

/// SQLite-backed recognition history.
pub struct HistoryLog {
    conn: Mutex<Connection>,
}

impl HistoryLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = crate::open_connection(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Unavailable)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL).map_err(StoreError::Unavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Durably append one record.
    pub fn append(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        self.conn()
            .execute(
                INSERT_SQL,
                params![record.identity, record.confidence, record.timestamp.timestamp_micros()],
            )
            .map_err(StoreError::Persistence)?;
        tracing::debug!(identity = %record.identity, confidence = record.confidence, "history appended");
        Ok(())
    }

    /// Append several records in one transaction: all of them or none.
    pub fn append_all(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::Persistence)?;
        {
            let mut stmt = tx.prepare_cached(INSERT_SQL).map_err(StoreError::Persistence)?;
            for record in records {
                stmt.execute(params![
                    record.identity,
                    record.confidence,
                    record.timestamp.timestamp_micros()
                ])
                .map_err(StoreError::Persistence)?;
            }
        }
        tx.commit().map_err(StoreError::Persistence)?;
        tracing::debug!(records = records.len(), "history appended");
        Ok(())
    }

    /// Records matching `filter`, oldest first. Equal timestamps keep
    /// append order.
    pub fn query(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        let (since, until) = filter.bounds();
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT identity, confidence, recorded_at FROM recognition_history \
                 WHERE {FILTER_SQL} ORDER BY recorded_at, seq"
            ))
            .map_err(StoreError::Unavailable)?;
        let rows = stmt
            .query_map(params![since, until, filter.identity], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(StoreError::Unavailable)?;

        let mut records = Vec::new();
        for row in rows {
            let (identity, confidence, micros) = row.map_err(StoreError::Unavailable)?;
            let timestamp = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| StoreError::Corrupt(format!("history timestamp {micros} out of range")))?;
            records.push(HistoryRecord {
                identity,
                confidence,
                timestamp,
            });
        }
        Ok(records)
    }

    /// Event count and mean confidence per identity, most frequent first.
    pub fn summary(&self, filter: &HistoryFilter) -> Result<Vec<IdentityCount>, StoreError> {
        let (since, until) = filter.bounds();
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT identity, COUNT(*), AVG(confidence) FROM recognition_history \
                 WHERE {FILTER_SQL} GROUP BY identity ORDER BY COUNT(*) DESC, identity"
            ))
            .map_err(StoreError::Unavailable)?;
        let rows = stmt
            .query_map(params![since, until, filter.identity], |row| {
                Ok(IdentityCount {
                    identity: row.get(0)?,
                    events: row.get::<_, i64>(1)?.max(0) as u64,
                    mean_confidence: row.get(2)?,
                })
            })
            .map_err(StoreError::Unavailable)?;

        let counts = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Unavailable)?;
        Ok(counts)
    }
}
