use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

use warden_types::{session_seed, ActionType, Trace, TraceStatus};

use crate::db::{json_from_db, json_to_db, ts_from_db, ts_to_db};
use crate::{Error, Result, Store, TraceFilter};

impl Store {
    /// Append one trace to its session's chain.
    ///
    /// Fails with [`Error::Integrity`] when the trace's `hash` does not match
    /// the derivation rule, or when `prev_hash` does not equal the stored
    /// hash of the session's most recent trace (the session seed when the
    /// session has no traces yet). A failed insert stalls only that
    /// session's chain.
    pub fn insert_trace(&self, trace: &Trace) -> Result<()> {
        let conn = self.conn();

        let expected = trace.expected_hash();
        if trace.hash != expected {
            return Err(Error::Integrity(format!(
                "trace {} hash does not match derivation",
                trace.id
            )));
        }

        let head = chain_head_locked(&conn, &trace.session_id)?;
        if trace.prev_hash != head {
            return Err(Error::Integrity(format!(
                "trace {} prev_hash does not match session head",
                trace.id
            )));
        }

        conn.execute(
            r#"
            INSERT INTO traces (
                id, session_id, agent_id, timestamp, action_type, action_name,
                request_body, response_body, status, policy_name, policy_reason,
                latency_ms, tokens_in, tokens_out, cost_usd, model, metadata,
                prev_hash, hash
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
            params![
                &trace.id,
                &trace.session_id,
                &trace.agent_id,
                ts_to_db(&trace.timestamp),
                trace.action_type.as_str(),
                &trace.action_name,
                &trace.request_body,
                &trace.response_body,
                trace.status.as_str(),
                &trace.policy_name,
                &trace.policy_reason,
                trace.latency_ms as i64,
                trace.tokens_in as i64,
                trace.tokens_out as i64,
                trace.cost_usd,
                &trace.model,
                json_to_db(&trace.metadata),
                &trace.prev_hash,
                &trace.hash,
            ],
        )?;

        Ok(())
    }

    /// Hash of the session's most recent trace, or the session seed.
    pub fn chain_head(&self, session_id: &str) -> Result<String> {
        chain_head_locked(&self.conn(), session_id)
    }

    pub fn get_trace(&self, id: &str) -> Result<Option<Trace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM traces WHERE id = ?1",
            TRACE_COLUMNS
        ))?;
        let trace = stmt.query_row([id], trace_from_row).optional()?;
        Ok(trace)
    }

    pub fn list_traces(&self, filter: &TraceFilter) -> Result<Vec<Trace>> {
        let mut sql = format!("SELECT {} FROM traces WHERE 1=1", TRACE_COLUMNS);
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            args.push(Box::new(session_id.clone()));
            sql.push_str(&format!(" AND session_id = ?{}", args.len()));
        }
        if let Some(agent_id) = &filter.agent_id {
            args.push(Box::new(agent_id.clone()));
            sql.push_str(&format!(" AND agent_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(Box::new(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(since) = &filter.since {
            args.push(Box::new(ts_to_db(since)));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }

        sql.push_str(" ORDER BY rowid DESC");
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        sql.push_str(&format!(" LIMIT {}", limit));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let traces = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), trace_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(traces)
    }

    /// Full-text search over `request_body`, `response_body`, `action_name`.
    pub fn search_traces(&self, query: &str, limit: usize) -> Result<Vec<Trace>> {
        let limit = if limit == 0 { 50 } else { limit };
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM traces t
            JOIN traces_fts f ON f.rowid = t.rowid
            WHERE traces_fts MATCH ?1
            ORDER BY f.rank
            LIMIT ?2
            "#,
            trace_columns_prefixed("t")
        ))?;
        let traces = stmt
            .query_map(params![query, limit as i64], trace_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(traces)
    }

    /// Walk the session's traces in insertion order, recomputing each hash
    /// and checking predecessor linkage. Returns `(true, None)` when intact,
    /// otherwise `(false, index_of_first_broken_trace)`.
    pub fn verify_chain(&self, session_id: &str) -> Result<(bool, Option<usize>)> {
        let traces = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM traces WHERE session_id = ?1 ORDER BY rowid ASC",
                TRACE_COLUMNS
            ))?;
            stmt.query_map([session_id], trace_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut expected_prev = session_seed(session_id);
        for (index, trace) in traces.iter().enumerate() {
            if trace.prev_hash != expected_prev || trace.hash != trace.expected_hash() {
                return Ok((false, Some(index)));
            }
            expected_prev = trace.hash.clone();
        }
        Ok((true, None))
    }

    pub fn count_traces(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM traces WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn chain_head_locked(conn: &Connection, session_id: &str) -> Result<String> {
    let head: Option<String> = conn
        .query_row(
            "SELECT hash FROM traces WHERE session_id = ?1 ORDER BY rowid DESC LIMIT 1",
            [session_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(head.unwrap_or_else(|| session_seed(session_id)))
}

const TRACE_COLUMNS: &str = "id, session_id, agent_id, timestamp, action_type, action_name, \
     request_body, response_body, status, policy_name, policy_reason, \
     latency_ms, tokens_in, tokens_out, cost_usd, model, metadata, prev_hash, hash";

fn trace_columns_prefixed(prefix: &str) -> String {
    TRACE_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", prefix, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn trace_from_row(row: &Row<'_>) -> rusqlite::Result<Trace> {
    let action_type_raw: String = row.get(4)?;
    let status_raw: String = row.get(8)?;
    let timestamp_raw: String = row.get(3)?;
    let metadata_raw: Option<String> = row.get(16)?;

    Ok(Trace {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent_id: row.get(2)?,
        timestamp: ts_from_db(&timestamp_raw)
            .map_err(|e| column_error(3, e.to_string()))?,
        action_type: ActionType::from_str(&action_type_raw)
            .map_err(|e| column_error(4, e.to_string()))?,
        action_name: row.get(5)?,
        request_body: row.get(6)?,
        response_body: row.get(7)?,
        status: TraceStatus::parse(&status_raw)
            .ok_or_else(|| column_error(8, format!("unknown trace status: {}", status_raw)))?,
        policy_name: row.get(9)?,
        policy_reason: row.get(10)?,
        latency_ms: row.get::<_, i64>(11)? as u64,
        tokens_in: row.get::<_, i64>(12)? as u64,
        tokens_out: row.get::<_, i64>(13)? as u64,
        cost_usd: row.get(14)?,
        model: row.get(15)?,
        metadata: json_from_db(metadata_raw),
        prev_hash: row.get(17)?,
        hash: row.get(18)?,
    })
}
