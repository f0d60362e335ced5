use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use warden_types::{Approval, ApprovalStatus, Verdict};

use crate::db::{ts_from_db, ts_to_db};
use crate::{Error, Result, Store};

impl Store {
    pub fn insert_approval(&self, approval: &Approval) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO approvals (id, session_id, trace_id, policy_name, action_summary,
                                   status, created_at, resolved_at, resolved_by,
                                   timeout_at, timeout_effect)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                &approval.id,
                &approval.session_id,
                &approval.trace_id,
                &approval.policy_name,
                &approval.action_summary,
                approval.status.as_str(),
                ts_to_db(&approval.created_at),
                approval.resolved_at.as_ref().map(ts_to_db),
                &approval.resolved_by,
                ts_to_db(&approval.timeout_at),
                approval.timeout_effect.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_approval(&self, id: &str) -> Result<Option<Approval>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM approvals WHERE id = ?1",
            APPROVAL_COLUMNS
        ))?;
        let approval = stmt.query_row([id], approval_from_row).optional()?;
        Ok(approval)
    }

    pub fn list_pending_approvals(&self) -> Result<Vec<Approval>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM approvals WHERE status = 'pending' ORDER BY created_at ASC",
            APPROVAL_COLUMNS
        ))?;
        let approvals = stmt
            .query_map([], approval_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(approvals)
    }

    /// Pending approvals whose timeout has passed; sweeper input.
    pub fn list_expired_approvals(&self, now: DateTime<Utc>) -> Result<Vec<Approval>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM approvals WHERE status = 'pending' AND timeout_at <= ?1
             ORDER BY timeout_at ASC",
            APPROVAL_COLUMNS
        ))?;
        let approvals = stmt
            .query_map([ts_to_db(&now)], approval_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(approvals)
    }

    /// Resolve a pending approval. Resolved approvals are immutable, so the
    /// update is guarded on `status = 'pending'`; resolving twice fails.
    pub fn resolve_approval(
        &self,
        id: &str,
        status: ApprovalStatus,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if status == ApprovalStatus::Pending {
            return Err(Error::Query("cannot resolve an approval to pending".into()));
        }
        let updated = self.conn().execute(
            r#"
            UPDATE approvals
            SET status = ?2, resolved_by = ?3, resolved_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, status.as_str(), resolved_by, ts_to_db(&at)],
        )?;
        if updated == 0 {
            return Err(Error::Query(format!(
                "approval {} not found or already resolved",
                id
            )));
        }
        Ok(())
    }
}

const APPROVAL_COLUMNS: &str = "id, session_id, trace_id, policy_name, action_summary, status, \
     created_at, resolved_at, resolved_by, timeout_at, timeout_effect";

fn approval_from_row(row: &Row<'_>) -> rusqlite::Result<Approval> {
    fn bad(index: usize, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            message.into(),
        )
    }

    let status_raw: String = row.get(5)?;
    let created_raw: String = row.get(6)?;
    let resolved_raw: Option<String> = row.get(7)?;
    let timeout_raw: String = row.get(9)?;
    let effect_raw: String = row.get(10)?;

    Ok(Approval {
        id: row.get(0)?,
        session_id: row.get(1)?,
        trace_id: row.get(2)?,
        policy_name: row.get(3)?,
        action_summary: row.get(4)?,
        status: ApprovalStatus::parse(&status_raw)
            .ok_or_else(|| bad(5, format!("unknown approval status: {}", status_raw)))?,
        created_at: ts_from_db(&created_raw).map_err(|e| bad(6, e.to_string()))?,
        resolved_at: match resolved_raw {
            Some(raw) => Some(ts_from_db(&raw).map_err(|e| bad(7, e.to_string()))?),
            None => None,
        },
        resolved_by: row.get(8)?,
        timeout_at: ts_from_db(&timeout_raw).map_err(|e| bad(9, e.to_string()))?,
        timeout_effect: Verdict::parse(&effect_raw)
            .ok_or_else(|| bad(10, format!("unknown verdict: {}", effect_raw)))?,
    })
}
