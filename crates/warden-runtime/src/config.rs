use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use warden_detect::DetectionConfig;
use warden_evolve::EvolveConfig;
use warden_policy::{CapabilityConfig, FailMode, InvariantConfig, SpawnConfig};
use warden_store::RedactionRule;

use crate::{Error, Result};

/// Where warden keeps its durable state.
///
/// An operator override (the explicit path argument, falling back to
/// `WARDEN_PATH`) always wins and may be `~/`-prefixed; without one the
/// platform data directory hosts a `warden/` subtree, and machines with
/// neither XDG dirs nor an override land in `$HOME/.warden`.
pub fn resolve_data_dir(explicit_path: Option<&str>) -> Result<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let expand = |raw: &str| match (raw.strip_prefix("~/"), home.as_ref()) {
        (Some(rest), Some(base)) => base.join(rest),
        _ => PathBuf::from(raw),
    };

    explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var("WARDEN_PATH").ok())
        .map(|raw| expand(&raw))
        .or_else(|| dirs::data_dir().map(|dir| dir.join("warden")))
        .or_else(|| home.as_ref().map(|base| base.join(".warden")))
        .ok_or_else(|| {
            Error::Config(
                "no usable data directory: set WARDEN_PATH or HOME".to_string(),
            )
        })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostConfig {
    /// Fallback $ per MTok for unknown models.
    #[serde(default = "default_input_rate")]
    pub default_input_per_mtok: f64,
    #[serde(default = "default_output_rate")]
    pub default_output_per_mtok: f64,
    /// `model → [input $/MTok, output $/MTok]` overrides.
    #[serde(default)]
    pub model_prices: HashMap<String, [f64; 2]>,
    /// Offset applied before bucketing daily aggregates at midnight.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

fn default_input_rate() -> f64 {
    1.0
}
fn default_output_rate() -> f64 {
    3.0
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            default_input_per_mtok: default_input_rate(),
            default_output_per_mtok: default_output_rate(),
            model_prices: HashMap::new(),
            utc_offset_hours: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// When set, webhook payloads carry an HMAC-SHA256 signature header.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub chat_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key (never the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_judge_model")]
    pub judge_model: String,
    #[serde(default = "default_judge_model")]
    pub playbook_model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "WARDEN_LLM_API_KEY".to_string()
}
fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            judge_model: default_judge_model(),
            playbook_model: default_judge_model(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: u64,
}

fn default_token_ttl() -> u64 {
    3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_ttl_seconds: default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub trace_days: u64,
}

fn default_retention_days() -> u64 {
    30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trace_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvolutionRunnerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_evolve_interval")]
    pub interval_minutes: u64,
    #[serde(flatten)]
    pub engine: EvolveConfig,
}

fn default_evolve_interval() -> u64 {
    60
}

impl Default for EvolutionRunnerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_evolve_interval(),
            engine: EvolveConfig::default(),
        }
    }
}

/// Top-level configuration, loaded from `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub fail_mode: FailMode,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default)]
    pub evolution: EvolutionRunnerConfig,
    /// Per-agent capability boundaries.
    #[serde(default)]
    pub capabilities: HashMap<String, CapabilityConfig>,
    /// Per-agent safety invariants.
    #[serde(default)]
    pub invariants: HashMap<String, Vec<InvariantConfig>>,
    /// Redaction rules applied to traces before hashing and persistence.
    #[serde(default)]
    pub redactions: Vec<RedactionRule>,
}

impl WardenConfig {
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: WardenConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Filesystem layout under the data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("warden.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn policies_dir(&self) -> PathBuf {
        self.root.join("policies")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn playbooks_dir(&self) -> PathBuf {
        self.root.join("playbooks")
    }

    /// Kill sentinel: its presence triggers a global kill.
    pub fn kill_sentinel(&self) -> PathBuf {
        self.root.join("KILL")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = WardenConfig::load_from(&tmp.path().join("missing.toml")).unwrap();
        assert_eq!(config.fail_mode, FailMode::Closed);
        assert_eq!(config.retention.trace_days, 30);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
fail_mode = "open"

[retention]
trace_days = 7

[cost]
default_input_per_mtok = 2.0
utc_offset_hours = -5

[cost.model_prices]
"gpt-4o" = [2.5, 10.0]

[alerts]
webhook_url = "https://hooks.example.com/warden"
webhook_secret = "s3cret"

[auth]
enabled = true
token_ttl_seconds = 600

[detection.loop]
threshold = 5

[spawn]
max_depth = 2

[evolution]
enabled = true
interval_minutes = 30
min_shadow_runs = 20

[capabilities.billing-agent]
fs_allow = ["/workspace/**"]
max_transfer_usd = 500.0

[[invariants.billing-agent]]
name = "no-prod"
condition = 'action.target == "prod"'
mode = "proxy"
effect = "terminate"

[[redactions]]
pattern = "sk-[A-Za-z0-9]+"
replacement = "[KEY]"
"#;
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, raw).unwrap();

        let config = WardenConfig::load_from(&path).unwrap();
        assert_eq!(config.fail_mode, FailMode::Open);
        assert_eq!(config.retention.trace_days, 7);
        assert_eq!(config.cost.utc_offset_hours, -5);
        assert_eq!(config.cost.model_prices["gpt-4o"], [2.5, 10.0]);
        assert!(config.auth.enabled);
        assert_eq!(config.detection.loop_detection.threshold, 5);
        assert_eq!(config.spawn.max_depth, 2);
        assert!(config.evolution.enabled);
        assert_eq!(config.evolution.engine.min_shadow_runs, 20);
        assert!(config.capabilities.contains_key("billing-agent"));
        assert_eq!(config.invariants["billing-agent"].len(), 1);
        assert_eq!(config.redactions.len(), 1);
    }

    #[test]
    fn test_env_override_for_data_dir() {
        // Explicit beats everything, including the env var.
        let explicit = resolve_data_dir(Some("/tmp/warden-test")).unwrap();
        assert_eq!(explicit, PathBuf::from("/tmp/warden-test"));
    }

    #[test]
    fn test_tilde_override_expands_against_home() {
        // Only meaningful where HOME is set (the usual CI/dev case).
        if let Some(home) = std::env::var_os("HOME") {
            let resolved = resolve_data_dir(Some("~/warden-data")).unwrap();
            assert_eq!(resolved, PathBuf::from(home).join("warden-data"));
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new(PathBuf::from("/data/warden"));
        assert_eq!(layout.db_path(), PathBuf::from("/data/warden/warden.db"));
        assert_eq!(layout.kill_sentinel(), PathBuf::from("/data/warden/KILL"));
        assert!(layout.policies_dir().ends_with("policies"));
    }
}
