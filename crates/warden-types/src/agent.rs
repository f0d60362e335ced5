use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Governed agent, auto-registered on first observed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Number of the active [`AgentVersion`], 0 when none released yet.
    pub current_version: u32,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub metadata: Value,
}

/// Lifecycle state of an agent version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Active,
    Candidate,
    Shadow,
    Retired,
    RolledBack,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Active => "active",
            VersionStatus::Candidate => "candidate",
            VersionStatus::Shadow => "shadow",
            VersionStatus::Retired => "retired",
            VersionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(VersionStatus::Active),
            "candidate" => Some(VersionStatus::Candidate),
            "shadow" => Some(VersionStatus::Shadow),
            "retired" => Some(VersionStatus::Retired),
            "rolled_back" => Some(VersionStatus::RolledBack),
            _ => None,
        }
    }
}

/// Snapshot of an agent's evolvable configuration (primarily the system
/// prompt). At most one version per agent is `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVersion {
    pub id: String,
    pub agent_id: String,
    /// Monotonic per agent; suffix-free directory name is `v<version_number>`.
    pub version_number: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub status: VersionStatus,
    pub system_prompt: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_from_prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_results: Option<Value>,
}
