use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle state.
///
/// Transitions are monotone: `active ⇄ paused`, and both may move to the
/// terminal states `completed` / `terminated`, which never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Terminated,
    Paused,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            "terminated" => Some(SessionStatus::Terminated),
            "paused" => Some(SessionStatus::Paused),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Terminated)
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (SessionStatus::Active, SessionStatus::Paused) => true,
            (SessionStatus::Paused, SessionStatus::Active) => true,
            (_, SessionStatus::Completed) | (_, SessionStatus::Terminated) => true,
            _ => false,
        }
    }
}

/// A named group of traces sharing lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// `ses_` prefix + random 96-bit suffix.
    pub id: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub total_cost: f64,
    pub action_count: u64,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
}

impl Session {
    pub fn new(id: String, agent_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            agent_id,
            started_at,
            ended_at: None,
            status: SessionStatus::Active,
            total_cost: 0.0,
            action_count: 0,
            metadata: Value::Null,
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [SessionStatus::Completed, SessionStatus::Terminated] {
            for next in [
                SessionStatus::Active,
                SessionStatus::Paused,
                SessionStatus::Completed,
                SessionStatus::Terminated,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_pause_resume_cycle() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Paused));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn test_both_live_states_can_end() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Terminated));
    }

    #[test]
    fn test_new_session_defaults() {
        let s = Session::new("ses_x".into(), "a".into(), Utc::now());
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.total_cost, 0.0);
        assert_eq!(s.action_count, 0);
        assert!(s.ended_at.is_none());
    }
}
