use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

use warden_types::TraceStatus;

use crate::schema;
use crate::Result;

/// Filter for trace listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub status: Option<TraceStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Single-file store for all durable state.
///
/// One connection behind a mutex keeps the single-writer discipline; WAL
/// journaling lets external readers (dashboard, CLI) read concurrently.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        schema::init_schema(&conn)?;
        debug!(path = %db_path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Delete traces older than the retention window. Returns removed count.
    pub fn prune_older_than(&self, window: Duration) -> Result<usize> {
        let cutoff = ts_to_db(&(Utc::now() - window));
        let removed = self
            .conn()
            .execute("DELETE FROM traces WHERE timestamp < ?1", [&cutoff])?;
        if removed > 0 {
            debug!(removed, "pruned traces past retention");
        }
        Ok(removed)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn().execute("VACUUM", [])?;
        Ok(())
    }
}

pub(crate) fn ts_to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Query(format!("bad timestamp '{}': {}", raw, e)))
}

pub(crate) fn json_to_db(value: &serde_json::Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        serde_json::to_string(value).ok()
    }
}

pub(crate) fn json_from_db(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null)
}
