use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

use warden_store::Store;
use warden_types::{
    new_approval_id, AlertEvent, Approval, ApprovalStatus, Clock, Severity, Verdict,
};

use crate::{Error, Result};

/// Persisted queue of parked high-risk actions.
pub struct ApprovalQueue {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

/// Result of sweeping one expired approval.
#[derive(Debug, Clone)]
pub struct TimedOutApproval {
    pub approval: Approval,
    pub effect: Verdict,
}

impl ApprovalQueue {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Park an action pending human review. Returns the stored approval and
    /// the alert announcing it to the configured approvers.
    #[allow(clippy::too_many_arguments)]
    pub fn park(
        &self,
        session_id: &str,
        trace_id: &str,
        policy_name: &str,
        action_summary: &str,
        approvers: &[String],
        timeout_minutes: u64,
        timeout_effect: Verdict,
    ) -> Result<(Approval, AlertEvent)> {
        let now = self.clock.now();
        let approval = Approval {
            id: new_approval_id(),
            session_id: session_id.to_string(),
            trace_id: trace_id.to_string(),
            policy_name: policy_name.to_string(),
            action_summary: action_summary.to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
            timeout_at: now + Duration::minutes(timeout_minutes as i64),
            timeout_effect,
        };
        self.store.insert_approval(&approval)?;

        let mut alert = AlertEvent::new(
            "approval_pending",
            Severity::Info,
            "Action awaiting approval",
            format!("{} parked by policy '{}'", action_summary, policy_name),
        );
        alert.session_id = session_id.to_string();
        alert.details = serde_json::json!({
            "approval_id": approval.id,
            "approvers": approvers,
            "timeout_at": approval.timeout_at.to_rfc3339(),
        });

        Ok((approval, alert))
    }

    pub fn list_pending(&self) -> Result<Vec<Approval>> {
        Ok(self.store.list_pending_approvals()?)
    }

    pub fn get(&self, id: &str) -> Result<Approval> {
        self.store
            .get_approval(id)?
            .ok_or_else(|| Error::NotFound(format!("approval {}", id)))
    }

    pub fn approve(&self, id: &str, actor: &str) -> Result<Approval> {
        self.resolve(id, ApprovalStatus::Approved, actor)
    }

    pub fn deny(&self, id: &str, actor: &str) -> Result<Approval> {
        self.resolve(id, ApprovalStatus::Denied, actor)
    }

    fn resolve(&self, id: &str, status: ApprovalStatus, actor: &str) -> Result<Approval> {
        // Existence first, for a clean NotFound over a generic query error.
        let existing = self.get(id)?;
        if existing.status != ApprovalStatus::Pending {
            return Err(Error::Validation(format!(
                "approval {} already {}",
                id,
                existing.status.as_str()
            )));
        }
        self.store
            .resolve_approval(id, status, actor, self.clock.now())?;
        info!(approval = id, status = status.as_str(), actor, "approval resolved");
        self.get(id)
    }

    /// Resolve every expired pending approval with its `timeout_effect`.
    pub fn sweep_once(&self) -> Result<Vec<TimedOutApproval>> {
        let now = self.clock.now();
        let expired = self.store.list_expired_approvals(now)?;
        let mut timed_out = Vec::with_capacity(expired.len());
        for approval in expired {
            self.store
                .resolve_approval(&approval.id, ApprovalStatus::TimedOut, "sweeper", now)?;
            timed_out.push(TimedOutApproval {
                effect: approval.timeout_effect,
                approval,
            });
        }
        Ok(timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::ManualClock;

    fn queue() -> (ApprovalQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = ApprovalQueue::new(
            Arc::new(Store::open_in_memory().unwrap()),
            clock.clone(),
        );
        (queue, clock)
    }

    #[test]
    fn test_park_and_approve() {
        let (queue, _clock) = queue();
        let (approval, alert) = queue
            .park(
                "ses_1",
                "t1",
                "manual-review",
                "transfer $900",
                &["ops@example.com".to_string()],
                30,
                Verdict::Deny,
            )
            .unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(alert.alert_type, "approval_pending");
        assert_eq!(queue.list_pending().unwrap().len(), 1);

        let resolved = queue.approve(&approval.id, "ops@example.com").unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("ops@example.com"));
        assert!(queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_double_resolution_rejected() {
        let (queue, _clock) = queue();
        let (approval, _) = queue
            .park("ses_1", "t1", "p", "a", &[], 30, Verdict::Deny)
            .unwrap();
        queue.deny(&approval.id, "ops").unwrap();
        assert!(matches!(
            queue.approve(&approval.id, "ops"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_approval_not_found() {
        let (queue, _clock) = queue();
        assert!(matches!(queue.get("apr_missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sweeper_times_out_expired() {
        let (queue, clock) = queue();
        let (approval, _) = queue
            .park("ses_1", "t1", "p", "risky step", &[], 30, Verdict::Terminate)
            .unwrap();

        // Nothing expires before the deadline.
        assert!(queue.sweep_once().unwrap().is_empty());

        clock.advance(Duration::minutes(31));
        let swept = queue.sweep_once().unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].effect, Verdict::Terminate);

        let stored = queue.get(&approval.id).unwrap();
        assert_eq!(stored.status, ApprovalStatus::TimedOut);
        assert_eq!(stored.resolved_by.as_deref(), Some("sweeper"));
    }
}
