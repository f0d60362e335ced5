use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{Error, Result};

/// Kind of action an agent intends to perform.
///
/// This is a closed set: the SDK reports one of these identifiers with every
/// evaluation or trace call, and the wire strings (`llm.chat`, `tool.call`, …)
/// are also the values the hash chain and the expression language see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "llm.chat")]
    LlmChat,
    #[serde(rename = "llm.embedding")]
    LlmEmbedding,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "api.request")]
    ApiRequest,
    #[serde(rename = "db.query")]
    DbQuery,
    #[serde(rename = "file.write")]
    FileWrite,
    #[serde(rename = "file.read")]
    FileRead,
    #[serde(rename = "code.exec")]
    CodeExec,
    #[serde(rename = "mcp.tool")]
    McpTool,
    #[serde(rename = "agent.spawn")]
    AgentSpawn,
    #[serde(rename = "skill.install")]
    SkillInstall,
    #[serde(rename = "skill.invoke")]
    SkillInvoke,
    #[serde(rename = "message.send")]
    MessageSend,
    #[serde(rename = "financial.transfer")]
    FinancialTransfer,
    #[serde(rename = "config.change")]
    ConfigChange,
}

impl ActionType {
    pub const ALL: [ActionType; 15] = [
        ActionType::LlmChat,
        ActionType::LlmEmbedding,
        ActionType::ToolCall,
        ActionType::ApiRequest,
        ActionType::DbQuery,
        ActionType::FileWrite,
        ActionType::FileRead,
        ActionType::CodeExec,
        ActionType::McpTool,
        ActionType::AgentSpawn,
        ActionType::SkillInstall,
        ActionType::SkillInvoke,
        ActionType::MessageSend,
        ActionType::FinancialTransfer,
        ActionType::ConfigChange,
    ];

    /// Wire string for this action type (also used in hash derivation).
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::LlmChat => "llm.chat",
            ActionType::LlmEmbedding => "llm.embedding",
            ActionType::ToolCall => "tool.call",
            ActionType::ApiRequest => "api.request",
            ActionType::DbQuery => "db.query",
            ActionType::FileWrite => "file.write",
            ActionType::FileRead => "file.read",
            ActionType::CodeExec => "code.exec",
            ActionType::McpTool => "mcp.tool",
            ActionType::AgentSpawn => "agent.spawn",
            ActionType::SkillInstall => "skill.install",
            ActionType::SkillInvoke => "skill.invoke",
            ActionType::MessageSend => "message.send",
            ActionType::FinancialTransfer => "financial.transfer",
            ActionType::ConfigChange => "config.change",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ActionType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| Error::Validation(format!("unknown action type: {}", s)))
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action description as reported by the SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub name: String,
    /// Parameters as a JSON string (decoded into the context before policy
    /// evaluation; kept opaque on the wire).
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub target: String,
}

/// Optional caller-supplied session context (used when the SDK tracks its own
/// accumulators, e.g. for agents replayed against a fresh sidecar).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerContext {
    #[serde(default)]
    pub session_cost: Option<f64>,
    #[serde(default)]
    pub session_action_count: Option<u64>,
    #[serde(default)]
    pub session_duration_seconds: Option<u64>,
}

/// Evaluation request as it arrives at the ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub session_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub agent_version: Option<String>,
    pub action: ActionSpec,
    #[serde(default)]
    pub context: Option<CallerContext>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Fully-resolved context a single policy evaluation runs against.
///
/// Built once per evaluation by the ingress from the request plus the session
/// manager's accumulators; the expression evaluator reads it allocation-free.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub action_type: ActionType,
    pub action_name: String,
    pub action_target: String,
    /// Decoded `action.params` (JSON object or Null when absent/unparseable).
    pub params: Value,

    pub session_id: String,
    pub agent_id: String,
    pub session_cost: f64,
    pub session_action_count: u64,

    pub agent_name: String,
    pub agent_daily_cost: f64,

    /// Recent timestamps of actions of this type in this session, newest last,
    /// including the action under evaluation. Feeds rate-limit rules.
    pub action_timestamps: Vec<DateTime<Utc>>,

    pub now: DateTime<Utc>,
}

impl ActionContext {
    /// Minimal context for tests and for paths that evaluate expressions
    /// outside a live session (inject-mode invariant rendering).
    pub fn bare(action_type: ActionType, action_name: &str) -> Self {
        Self {
            action_type,
            action_name: action_name.to_string(),
            action_target: String::new(),
            params: Value::Null,
            session_id: String::new(),
            agent_id: String::new(),
            session_cost: 0.0,
            session_action_count: 0,
            agent_name: String::new(),
            agent_daily_cost: 0.0,
            action_timestamps: Vec::new(),
            now: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_action_type_roundtrip() {
        for t in ActionType::ALL {
            let parsed = ActionType::from_str(t.as_str()).unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn test_action_type_serde_uses_wire_string() {
        let json = serde_json::to_string(&ActionType::FinancialTransfer).unwrap();
        assert_eq!(json, "\"financial.transfer\"");

        let back: ActionType = serde_json::from_str("\"tool.call\"").unwrap();
        assert_eq!(back, ActionType::ToolCall);
    }

    #[test]
    fn test_unknown_action_type_rejected() {
        assert!(ActionType::from_str("tool.execute").is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{
            "agent_id": "billing-agent",
            "action": {"type": "tool.call", "name": "search"}
        }"#;
        let req: ActionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, "");
        assert_eq!(req.action.action_type, ActionType::ToolCall);
        assert!(req.action.params.is_empty());
    }
}
