use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Outbound alert payload, fanned out to webhook/chat senders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Alert kind: `policy_violation`, `loop`, `cost_anomaly`, `spiral`,
    /// `velocity`, `drift`, `approval_pending`, `kill_switch`, `rollback`, …
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub agent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub details: Value,
    /// RFC 3339 timestamp.
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            message: message.into(),
            agent_id: String::new(),
            session_id: String::new(),
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Dedup key: alerts sharing this tuple collapse within the TTL.
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.alert_type.clone(),
            self.agent_id.clone(),
            self.session_id.clone(),
        )
    }
}
