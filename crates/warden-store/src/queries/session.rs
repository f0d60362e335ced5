use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use warden_types::{Session, SessionStatus};

use crate::db::{json_from_db, json_to_db, ts_from_db, ts_to_db};
use crate::{Result, Store};

/// Per-session aggregates derived from the trace table, feeding session
/// summaries and evolution scoring.
#[derive(Debug, Clone, Default)]
pub struct SessionTraceStats {
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    pub terminated: usize,
    pub throttled: usize,
    pub avg_latency_ms: f64,
    pub total_cost: f64,
    pub total_tokens: u64,
}

impl SessionTraceStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.allowed as f64 / self.total as f64
    }

    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.denied + self.terminated) as f64 / self.total as f64
    }
}

impl Store {
    pub fn upsert_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO sessions (id, agent_id, started_at, ended_at, status,
                                  total_cost, action_count, metadata, score)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                ended_at = ?4,
                status = ?5,
                total_cost = ?6,
                action_count = ?7,
                metadata = COALESCE(?8, metadata),
                score = COALESCE(?9, score)
            "#,
            params![
                &session.id,
                &session.agent_id,
                ts_to_db(&session.started_at),
                session.ended_at.as_ref().map(ts_to_db),
                session.status.as_str(),
                session.total_cost,
                session.action_count as i64,
                json_to_db(&session.metadata),
                session.score.as_ref().and_then(json_to_db),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, started_at, ended_at, status, total_cost,
                    action_count, metadata, score
             FROM sessions WHERE id = ?1",
        )?;
        let session = stmt.query_row([id], session_from_row).optional()?;
        Ok(session)
    }

    pub fn list_sessions(
        &self,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let limit = if limit == 0 { 100 } else { limit };
        let mut sql = String::from(
            "SELECT id, agent_id, started_at, ended_at, status, total_cost,
                    action_count, metadata, score
             FROM sessions WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(agent_id) = agent_id {
            args.push(Box::new(agent_id.to_string()));
            sql.push_str(&format!(" AND agent_id = ?{}", args.len()));
        }
        if let Some(since) = since {
            args.push(Box::new(ts_to_db(&since)));
            sql.push_str(&format!(" AND started_at >= ?{}", args.len()));
        }
        sql.push_str(&format!(" ORDER BY started_at DESC LIMIT {}", limit));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                session_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Replace the session's score JSON.
    pub fn score_session(&self, id: &str, score: &serde_json::Value) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE sessions SET score = ?2 WHERE id = ?1",
            params![id, json_to_db(score)],
        )?;
        Ok(updated > 0)
    }

    pub fn session_trace_stats(&self, session_id: &str) -> Result<SessionTraceStats> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                COUNT(*),
                SUM(CASE WHEN status = 'allowed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'denied' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'terminated' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'throttled' THEN 1 ELSE 0 END),
                AVG(latency_ms),
                SUM(cost_usd),
                SUM(tokens_in + tokens_out)
            FROM traces WHERE session_id = ?1
            "#,
        )?;
        let stats = stmt.query_row([session_id], |row| {
            let total: i64 = row.get(0)?;
            Ok(SessionTraceStats {
                total: total as usize,
                allowed: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as usize,
                denied: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as usize,
                terminated: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as usize,
                throttled: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as usize,
                avg_latency_ms: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                total_cost: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                total_tokens: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u64,
            })
        })?;
        Ok(stats)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let started_raw: String = row.get(2)?;
    let ended_raw: Option<String> = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let metadata_raw: Option<String> = row.get(7)?;
    let score_raw: Option<String> = row.get(8)?;

    let score = score_raw
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    Ok(Session {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        started_at: ts_from_db(&started_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        ended_at: match ended_raw {
            Some(raw) => Some(ts_from_db(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    e.to_string().into(),
                )
            })?),
            None => None,
        },
        status: SessionStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown session status: {}", status_raw).into(),
            )
        })?,
        total_cost: row.get(5)?,
        action_count: row.get::<_, i64>(6)? as u64,
        metadata: json_from_db(metadata_raw),
        score,
    })
}
