use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use warden_types::{Verdict, Violation};

use crate::db::{ts_from_db, ts_to_db};
use crate::{Result, Store};

impl Store {
    pub fn insert_violation(&self, violation: &Violation) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO violations (id, trace_id, session_id, agent_id,
                                    policy_name, effect, timestamp, action_summary)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                &violation.id,
                &violation.trace_id,
                &violation.session_id,
                &violation.agent_id,
                &violation.policy_name,
                violation.effect.as_str(),
                ts_to_db(&violation.timestamp),
                &violation.action_summary,
            ],
        )?;
        Ok(())
    }

    pub fn list_violations(
        &self,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Violation>> {
        let limit = if limit == 0 { 100 } else { limit };
        let mut sql = String::from(
            "SELECT id, trace_id, session_id, agent_id, policy_name, effect,
                    timestamp, action_summary
             FROM violations WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(agent_id) = agent_id {
            args.push(Box::new(agent_id.to_string()));
            sql.push_str(&format!(" AND agent_id = ?{}", args.len()));
        }
        if let Some(since) = since {
            args.push(Box::new(ts_to_db(&since)));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {}", limit));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let violations = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                violation_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(violations)
    }

    pub fn count_session_violations(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM violations WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn violation_from_row(row: &Row<'_>) -> rusqlite::Result<Violation> {
    fn bad(index: usize, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            message.into(),
        )
    }

    let effect_raw: String = row.get(5)?;
    let ts_raw: String = row.get(6)?;

    Ok(Violation {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        session_id: row.get(2)?,
        agent_id: row.get(3)?,
        policy_name: row.get(4)?,
        effect: Verdict::parse(&effect_raw)
            .ok_or_else(|| bad(5, format!("unknown verdict: {}", effect_raw)))?,
        timestamp: ts_from_db(&ts_raw).map_err(|e| bad(6, e.to_string()))?,
        action_summary: row.get(7)?,
    })
}
