use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{compute_trace_hash, truncate_body, ActionType};

/// Outcome recorded on a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Allowed,
    Denied,
    Terminated,
    Approved,
    Pending,
    Throttled,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Allowed => "allowed",
            TraceStatus::Denied => "denied",
            TraceStatus::Terminated => "terminated",
            TraceStatus::Approved => "approved",
            TraceStatus::Pending => "pending",
            TraceStatus::Throttled => "throttled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allowed" => Some(TraceStatus::Allowed),
            "denied" => Some(TraceStatus::Denied),
            "terminated" => Some(TraceStatus::Terminated),
            "approved" => Some(TraceStatus::Approved),
            "pending" => Some(TraceStatus::Pending),
            "throttled" => Some(TraceStatus::Throttled),
            _ => None,
        }
    }
}

/// Immutable audit record of one action.
///
/// Maps 1:1 to a row in the trace store. `prev_hash`/`hash` link each trace
/// into its session's chain; after insertion a trace is never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Time-ordered 26-char identifier (lexicographic order = insert order).
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,

    pub action_type: ActionType,
    pub action_name: String,
    /// Truncated at 1 MiB before hashing and persistence.
    pub request_body: String,
    pub response_body: String,

    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_reason: Option<String>,

    pub latency_ms: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Value,

    /// Hash of the session's previous trace (or the session seed).
    pub prev_hash: String,
    /// `SHA-256(id | session_id | action_type | request_body | response_body | prev_hash)`
    pub hash: String,
}

impl Trace {
    /// Truncate bodies, link to `prev_hash`, and compute this trace's hash.
    ///
    /// Must be called before insertion; the store rejects traces whose hash
    /// does not match the derivation.
    pub fn seal(&mut self, prev_hash: String) {
        self.request_body = truncate_body(&self.request_body).to_string();
        self.response_body = truncate_body(&self.response_body).to_string();
        self.prev_hash = prev_hash;
        self.hash = self.expected_hash();
    }

    /// Recompute the hash from the stored fields (chain verification).
    pub fn expected_hash(&self) -> String {
        compute_trace_hash(
            &self.id,
            &self.session_id,
            self.action_type.as_str(),
            &self.request_body,
            &self.response_body,
            &self.prev_hash,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{new_trace_id, session_seed};

    fn sample_trace() -> Trace {
        Trace {
            id: new_trace_id(),
            session_id: "ses_0123456789abcdef01234567".to_string(),
            agent_id: "agent-1".to_string(),
            timestamp: Utc::now(),
            action_type: ActionType::ToolCall,
            action_name: "search".to_string(),
            request_body: "{\"q\":\"rust\"}".to_string(),
            response_body: String::new(),
            status: TraceStatus::Allowed,
            policy_name: None,
            policy_reason: None,
            latency_ms: 3,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            model: None,
            metadata: Value::Null,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_seal_links_and_hashes() {
        let mut t = sample_trace();
        let seed = session_seed(&t.session_id);
        t.seal(seed.clone());
        assert_eq!(t.prev_hash, seed);
        assert_eq!(t.hash, t.expected_hash());
    }

    #[test]
    fn test_mutation_breaks_expected_hash() {
        let mut t = sample_trace();
        t.seal(session_seed(&t.session_id));
        let sealed_hash = t.hash.clone();
        t.request_body.push('!');
        assert_ne!(sealed_hash, t.expected_hash());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for s in [
            TraceStatus::Allowed,
            TraceStatus::Denied,
            TraceStatus::Terminated,
            TraceStatus::Approved,
            TraceStatus::Pending,
            TraceStatus::Throttled,
        ] {
            assert_eq!(TraceStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TraceStatus::parse("bogus"), None);
    }
}
