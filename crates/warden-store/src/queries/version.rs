use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use warden_types::{AgentVersion, VersionStatus};

use crate::db::{json_from_db, json_to_db, ts_from_db, ts_to_db};
use crate::{Result, Store};

impl Store {
    pub fn upsert_version(&self, version: &AgentVersion) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO agent_versions (
                id, agent_id, version_number, created_at, promoted_at,
                rolled_back_at, status, system_prompt, config,
                diff_from_prev, diff_reason, shadow_results
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(agent_id, version_number) DO UPDATE SET
                promoted_at = ?5,
                rolled_back_at = ?6,
                status = ?7,
                system_prompt = ?8,
                config = COALESCE(?9, config),
                diff_from_prev = COALESCE(?10, diff_from_prev),
                diff_reason = COALESCE(?11, diff_reason),
                shadow_results = COALESCE(?12, shadow_results)
            "#,
            params![
                &version.id,
                &version.agent_id,
                version.version_number as i64,
                ts_to_db(&version.created_at),
                version.promoted_at.as_ref().map(ts_to_db),
                version.rolled_back_at.as_ref().map(ts_to_db),
                version.status.as_str(),
                &version.system_prompt,
                json_to_db(&version.config),
                &version.diff_from_prev,
                &version.diff_reason,
                version.shadow_results.as_ref().and_then(json_to_db),
            ],
        )?;
        Ok(())
    }

    pub fn get_version(&self, agent_id: &str, number: u32) -> Result<Option<AgentVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agent_versions WHERE agent_id = ?1 AND version_number = ?2",
            VERSION_COLUMNS
        ))?;
        let version = stmt
            .query_row(params![agent_id, number as i64], version_from_row)
            .optional()?;
        Ok(version)
    }

    pub fn list_versions(&self, agent_id: &str) -> Result<Vec<AgentVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agent_versions WHERE agent_id = ?1 ORDER BY version_number ASC",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map([agent_id], version_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    pub fn update_version_status(
        &self,
        agent_id: &str,
        number: u32,
        status: VersionStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let column = match status {
            VersionStatus::Active => Some("promoted_at"),
            VersionStatus::RolledBack => Some("rolled_back_at"),
            _ => None,
        };
        let sql = match column {
            Some(col) => format!(
                "UPDATE agent_versions SET status = ?3, {} = ?4
                 WHERE agent_id = ?1 AND version_number = ?2",
                col
            ),
            None => "UPDATE agent_versions SET status = ?3
                     WHERE agent_id = ?1 AND version_number = ?2"
                .to_string(),
        };
        match column {
            Some(_) => self.conn().execute(
                &sql,
                params![agent_id, number as i64, status.as_str(), ts_to_db(&at)],
            )?,
            None => self
                .conn()
                .execute(&sql, params![agent_id, number as i64, status.as_str()])?,
        };
        Ok(())
    }
}

const VERSION_COLUMNS: &str = "id, agent_id, version_number, created_at, promoted_at, \
     rolled_back_at, status, system_prompt, config, diff_from_prev, diff_reason, shadow_results";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<AgentVersion> {
    fn ts_col(raw: Option<String>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
        match raw {
            Some(raw) => ts_from_db(&raw).map(Some).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    index,
                    rusqlite::types::Type::Text,
                    e.to_string().into(),
                )
            }),
            None => Ok(None),
        }
    }

    let created_raw: String = row.get(3)?;
    let status_raw: String = row.get(6)?;
    let config_raw: Option<String> = row.get(8)?;
    let shadow_raw: Option<String> = row.get(11)?;

    Ok(AgentVersion {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        version_number: row.get::<_, i64>(2)? as u32,
        created_at: ts_from_db(&created_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        promoted_at: ts_col(row.get(4)?, 4)?,
        rolled_back_at: ts_col(row.get(5)?, 5)?,
        status: VersionStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown version status: {}", status_raw).into(),
            )
        })?,
        system_prompt: row.get(7)?,
        config: json_from_db(config_raw),
        diff_from_prev: row.get(9)?,
        diff_reason: row.get(10)?,
        shadow_results: shadow_raw.as_deref().and_then(|s| serde_json::from_str(s).ok()),
    })
}
