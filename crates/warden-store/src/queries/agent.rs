use rusqlite::{params, OptionalExtension, Row};

use warden_types::Agent;

use crate::db::{json_from_db, json_to_db, ts_from_db, ts_to_db};
use crate::{Result, Store};

impl Store {
    /// Insert an agent if unseen; an existing row keeps its fields.
    pub fn register_agent(&self, agent: &Agent) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO agents (id, name, created_at, current_version, config, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                &agent.id,
                &agent.name,
                ts_to_db(&agent.created_at),
                agent.current_version as i64,
                json_to_db(&agent.config),
                json_to_db(&agent.metadata),
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, current_version, config, metadata
             FROM agents WHERE id = ?1",
        )?;
        let agent = stmt.query_row([id], agent_from_row).optional()?;
        Ok(agent)
    }

    pub fn list_agents(&self, limit: usize) -> Result<Vec<Agent>> {
        let limit = if limit == 0 { 100 } else { limit };
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, current_version, config, metadata
             FROM agents ORDER BY created_at DESC LIMIT ?1",
        )?;
        let agents = stmt
            .query_map([limit as i64], agent_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(agents)
    }

    pub fn set_agent_current_version(&self, id: &str, version: u32) -> Result<()> {
        self.conn().execute(
            "UPDATE agents SET current_version = ?2 WHERE id = ?1",
            params![id, version as i64],
        )?;
        Ok(())
    }
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let created_raw: String = row.get(2)?;
    let config_raw: Option<String> = row.get(4)?;
    let metadata_raw: Option<String> = row.get(5)?;

    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: ts_from_db(&created_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        current_version: row.get::<_, i64>(3)? as u32,
        config: json_from_db(config_raw),
        metadata: json_from_db(metadata_raw),
    })
}
