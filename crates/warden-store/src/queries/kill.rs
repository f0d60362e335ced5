use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{ts_from_db, ts_to_db};
use crate::{Result, Store};

/// Durable record of one kill-switch trigger or reset.
#[derive(Debug, Clone)]
pub struct KillEventRecord {
    pub kind: String,
    pub scope: String,
    pub target_id: Option<String>,
    pub reason: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Store {
    pub fn insert_kill_event(&self, event: &KillEventRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO kill_events (kind, scope, target_id, reason, source, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                &event.kind,
                &event.scope,
                &event.target_id,
                &event.reason,
                &event.source,
                ts_to_db(&event.timestamp),
            ],
        )?;
        Ok(())
    }

    pub fn count_kill_events(&self) -> Result<usize> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM kill_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn recent_kill_events(&self, limit: usize) -> Result<Vec<KillEventRecord>> {
        let limit = if limit == 0 { 50 } else { limit };
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT kind, scope, target_id, reason, source, timestamp
             FROM kill_events ORDER BY seq DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map([limit as i64], kill_event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn kill_event_from_row(row: &Row<'_>) -> rusqlite::Result<KillEventRecord> {
    let ts_raw: String = row.get(5)?;
    Ok(KillEventRecord {
        kind: row.get(0)?,
        scope: row.get(1)?,
        target_id: row.get(2)?,
        reason: row.get(3)?,
        source: row.get(4)?,
        timestamp: ts_from_db(&ts_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
    })
}
