use serde::{Deserialize, Serialize};

use crate::TraceStatus;

/// Governance outcome of evaluating one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
    Terminate,
    Throttle,
    Approve,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
            Verdict::Terminate => "terminate",
            Verdict::Throttle => "throttle",
            Verdict::Approve => "approve",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Verdict::Allow),
            "deny" => Some(Verdict::Deny),
            "terminate" => Some(Verdict::Terminate),
            "throttle" => Some(Verdict::Throttle),
            "approve" => Some(Verdict::Approve),
            _ => None,
        }
    }

    /// Whether this verdict ends rule evaluation immediately.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Verdict::Deny | Verdict::Terminate | Verdict::Approve)
    }

    /// Trace status recorded for this verdict. An `approve` verdict parks the
    /// action, so its trace starts out `pending`.
    pub fn trace_status(&self) -> TraceStatus {
        match self {
            Verdict::Allow => TraceStatus::Allowed,
            Verdict::Deny => TraceStatus::Denied,
            Verdict::Terminate => TraceStatus::Terminated,
            Verdict::Throttle => TraceStatus::Throttled,
            Verdict::Approve => TraceStatus::Pending,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous response of the evaluate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResponse {
    pub verdict: Verdict,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    pub message: String,
    /// Set when verdict is `approve`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Throttle delay, set when verdict is `throttle`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
    pub latency_ms: u64,
}
