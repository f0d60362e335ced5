use chrono::{DateTime, Utc};

use warden_store::Store;
use warden_types::{new_trace_id, ActionType, Session, Trace, TraceStatus};

/// Builder-style fixture for traces. Defaults describe a cheap, allowed
/// tool call; override what the test cares about.
#[derive(Debug, Clone)]
pub struct TraceFixture {
    pub agent_id: String,
    pub session_id: String,
    pub action_type: ActionType,
    pub action_name: String,
    pub status: TraceStatus,
    pub request_body: String,
    pub response_body: String,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TraceFixture {
    pub fn new(agent_id: &str, session_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            action_type: ActionType::ToolCall,
            action_name: "search".to_string(),
            status: TraceStatus::Allowed,
            request_body: "{}".to_string(),
            response_body: String::new(),
            cost_usd: 0.001,
            latency_ms: 5,
            model: None,
            timestamp: Utc::now(),
        }
    }

    pub fn action(mut self, action_type: ActionType, name: &str) -> Self {
        self.action_type = action_type;
        self.action_name = name.to_string();
        self
    }

    pub fn status(mut self, status: TraceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn bodies(mut self, request: &str, response: &str) -> Self {
        self.request_body = request.to_string();
        self.response_body = response.to_string();
        self
    }

    pub fn build(self) -> Trace {
        Trace {
            id: new_trace_id(),
            session_id: self.session_id,
            agent_id: self.agent_id,
            timestamp: self.timestamp,
            action_type: self.action_type,
            action_name: self.action_name,
            request_body: self.request_body,
            response_body: self.response_body,
            status: self.status,
            policy_name: None,
            policy_reason: None,
            latency_ms: self.latency_ms,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: self.cost_usd,
            model: self.model,
            metadata: serde_json::Value::Null,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }
}

/// A default allowed trace for the given session.
pub fn make_trace(agent_id: &str, session_id: &str) -> Trace {
    TraceFixture::new(agent_id, session_id).build()
}

/// An active session owned by the agent.
pub fn make_session(agent_id: &str, session_id: &str) -> Session {
    Session::new(session_id.to_string(), agent_id.to_string(), Utc::now())
}

/// Seal against the session's current chain head and insert.
pub fn append_trace(store: &Store, mut trace: Trace) -> anyhow::Result<Trace> {
    let head = store.chain_head(&trace.session_id)?;
    trace.seal(head);
    store.insert_trace(&trace)?;
    Ok(trace)
}
