use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "denied" => Some(ApprovalStatus::Denied),
            "timed_out" => Some(ApprovalStatus::TimedOut),
            _ => None,
        }
    }
}

/// A parked high-risk action awaiting a human decision.
///
/// Once `status` leaves `pending` the record is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub session_id: String,
    pub trace_id: String,
    pub policy_name: String,
    pub action_summary: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub timeout_at: DateTime<Utc>,
    /// Verdict applied by the sweeper when the timeout passes unresolved.
    pub timeout_effect: Verdict,
}

/// Record of a deny/terminate outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub trace_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub policy_name: String,
    pub effect: Verdict,
    pub timestamp: DateTime<Utc>,
    pub action_summary: String,
}
