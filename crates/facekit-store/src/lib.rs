//! facekit-store — SQLite persistence for the face registry and the
//! recognition history.
//!
//! Both stores may share one database file. Each holds its own connection
//! behind a mutex; the file runs in WAL mode so readers in other processes
//! never observe a half-written entry.

pub mod error;
pub mod history;
pub mod registry;

pub use error::StoreError;
pub use history::{HistoryFilter, HistoryLog, HistoryRecord, IdentityCount};
pub use registry::{ImportReport, ReferenceEntry, Registry};

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a database file, creating its parent directory if needed.
pub(crate) fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(StoreError::Unavailable)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(StoreError::Unavailable)?;
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(StoreError::Unavailable)?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");
    Ok(conn)
}
