use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_types::ActionType;

/// One observed action, as fed to every detector.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub session_id: String,
    pub agent_id: String,
    pub action_type: ActionType,
    pub action_name: String,
    pub model: Option<String>,
    pub cost_usd: f64,
    /// LLM output text, when the action produced one (spiral detection).
    pub output: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionEvent {
    /// Loop signature: `action_type|action_name|model`.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}",
            self.action_type.as_str(),
            self.action_name,
            self.model.as_deref().unwrap_or("")
        )
    }
}

/// Response a detector (or its playbook) asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorAction {
    Alert,
    Pause,
    Terminate,
    /// Consult the detector's playbook; an LLM picks the concrete action.
    Playbook,
}

impl DetectorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorAction::Alert => "alert",
            DetectorAction::Pause => "pause",
            DetectorAction::Terminate => "terminate",
            DetectorAction::Playbook => "playbook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alert" => Some(DetectorAction::Alert),
            "pause" => Some(DetectorAction::Pause),
            "terminate" => Some(DetectorAction::Terminate),
            "playbook" => Some(DetectorAction::Playbook),
            _ => None,
        }
    }
}

/// Event emitted by the detection engine after playbook resolution.
/// `action` is always concrete (never `Playbook`).
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    /// Detector kind: `loop`, `cost_anomaly`, `spiral`, `velocity`, `drift`.
    pub detector: &'static str,
    pub session_id: String,
    pub agent_id: String,
    pub message: String,
    pub details: Value,
    pub action: DetectorAction,
}
