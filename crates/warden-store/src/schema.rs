use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            current_version INTEGER NOT NULL DEFAULT 0,
            config TEXT,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            status TEXT NOT NULL,
            total_cost REAL NOT NULL DEFAULT 0,
            action_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT,
            score TEXT
        );

        CREATE TABLE IF NOT EXISTS traces (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            action_type TEXT NOT NULL,
            action_name TEXT NOT NULL,
            request_body TEXT NOT NULL DEFAULT '',
            response_body TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            policy_name TEXT,
            policy_reason TEXT,
            latency_ms INTEGER NOT NULL DEFAULT 0,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            model TEXT,
            metadata TEXT,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agent_versions (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            promoted_at TEXT,
            rolled_back_at TEXT,
            status TEXT NOT NULL,
            system_prompt TEXT NOT NULL DEFAULT '',
            config TEXT,
            diff_from_prev TEXT,
            diff_reason TEXT,
            shadow_results TEXT,
            UNIQUE (agent_id, version_number)
        );

        CREATE TABLE IF NOT EXISTS approvals (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            trace_id TEXT NOT NULL,
            policy_name TEXT NOT NULL,
            action_summary TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            resolved_by TEXT,
            timeout_at TEXT NOT NULL,
            timeout_effect TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS violations (
            id TEXT PRIMARY KEY,
            trace_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            policy_name TEXT NOT NULL,
            effect TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            action_summary TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS kill_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            scope TEXT NOT NULL,
            target_id TEXT,
            reason TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_traces_session ON traces(session_id);
        CREATE INDEX IF NOT EXISTS idx_traces_agent_ts ON traces(agent_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_traces_ts ON traces(timestamp);
        CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent_id, started_at DESC);
        CREATE INDEX IF NOT EXISTS idx_versions_agent ON agent_versions(agent_id, version_number);
        CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status, timeout_at);
        CREATE INDEX IF NOT EXISTS idx_violations_session ON violations(session_id);
        CREATE INDEX IF NOT EXISTS idx_violations_agent_ts ON violations(agent_id, timestamp);

        CREATE VIRTUAL TABLE IF NOT EXISTS traces_fts USING fts5(
            action_name,
            request_body,
            response_body,
            content='traces',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS traces_fts_insert AFTER INSERT ON traces BEGIN
            INSERT INTO traces_fts(rowid, action_name, request_body, response_body)
            VALUES (new.rowid, new.action_name, new.request_body, new.response_body);
        END;

        CREATE TRIGGER IF NOT EXISTS traces_fts_delete AFTER DELETE ON traces BEGIN
            INSERT INTO traces_fts(traces_fts, rowid, action_name, request_body, response_body)
            VALUES ('delete', old.rowid, old.action_name, old.request_body, old.response_body);
        END;
        "#,
    )?;

    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TRIGGER IF EXISTS traces_fts_insert;
        DROP TRIGGER IF EXISTS traces_fts_delete;
        DROP TABLE IF EXISTS traces_fts;
        DROP TABLE IF EXISTS kill_events;
        DROP TABLE IF EXISTS violations;
        DROP TABLE IF EXISTS approvals;
        DROP TABLE IF EXISTS agent_versions;
        DROP TABLE IF EXISTS traces;
        DROP TABLE IF EXISTS sessions;
        DROP TABLE IF EXISTS agents;
        "#,
    )?;
    Ok(())
}
