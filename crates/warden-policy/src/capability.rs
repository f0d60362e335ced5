use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

use warden_types::{ActionContext, ActionType};

use crate::{Error, Result};

/// Per-agent capability declarations, loaded from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityConfig {
    /// Filesystem globs the agent may touch. Empty = unrestricted.
    #[serde(default)]
    pub fs_allow: Vec<String>,
    /// Filesystem globs always refused, checked before the allow list.
    #[serde(default)]
    pub fs_deny: Vec<String>,

    /// Domains reachable via api.request. Empty = unrestricted.
    #[serde(default)]
    pub net_allow_domains: Vec<String>,
    #[serde(default)]
    pub net_block_ports: Vec<u16>,

    /// Shell command names allowed for code.exec. Empty = unrestricted.
    #[serde(default)]
    pub shell_allow: Vec<String>,
    #[serde(default)]
    pub shell_deny: Vec<String>,
    /// Regex patterns refused anywhere in the command line.
    #[serde(default)]
    pub shell_block_patterns: Vec<String>,

    /// Per-channel message.send caps (messages per minute).
    #[serde(default)]
    pub channel_rate_caps: HashMap<String, u32>,

    /// Ceiling on a single financial.transfer, in USD.
    #[serde(default)]
    pub max_transfer_usd: Option<f64>,

    /// Whether agent.spawn is permitted at all.
    #[serde(default = "default_true")]
    pub allow_spawn: bool,
}

fn default_true() -> bool {
    true
}

struct CompiledCapabilities {
    fs_allow: Option<GlobSet>,
    fs_deny: Option<GlobSet>,
    net_allow_domains: Vec<String>,
    net_block_ports: Vec<u16>,
    shell_allow: Vec<String>,
    shell_deny: Vec<String>,
    shell_block_patterns: Vec<Regex>,
    channel_rate_caps: HashMap<String, u32>,
    max_transfer_usd: Option<f64>,
    allow_spawn: bool,
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Compile(format!("bad path glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| Error::Compile(e.to_string()))
}

impl CompiledCapabilities {
    fn compile(config: &CapabilityConfig) -> Result<Self> {
        let mut shell_block_patterns = Vec::with_capacity(config.shell_block_patterns.len());
        for pattern in &config.shell_block_patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                Error::Compile(format!("bad shell block pattern '{}': {}", pattern, e))
            })?;
            shell_block_patterns.push(regex);
        }
        Ok(Self {
            fs_allow: build_globset(&config.fs_allow)?,
            fs_deny: build_globset(&config.fs_deny)?,
            net_allow_domains: config.net_allow_domains.clone(),
            net_block_ports: config.net_block_ports.clone(),
            shell_allow: config.shell_allow.clone(),
            shell_deny: config.shell_deny.clone(),
            shell_block_patterns,
            channel_rate_caps: config.channel_rate_caps.clone(),
            max_transfer_usd: config.max_transfer_usd,
            allow_spawn: config.allow_spawn,
        })
    }
}

/// Per-agent capability boundary, checked synchronously before policy rules.
pub struct CapabilityEngine {
    agents: RwLock<HashMap<String, CompiledCapabilities>>,
}

impl Default for CapabilityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityEngine {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_agent(&self, agent_id: &str, config: &CapabilityConfig) -> Result<()> {
        let compiled = CompiledCapabilities::compile(config)?;
        self.agents.write().insert(agent_id.to_string(), compiled);
        Ok(())
    }

    pub fn remove_agent(&self, agent_id: &str) {
        self.agents.write().remove(agent_id);
    }

    /// Check one action against the agent's declared boundary.
    /// Agents without declarations are unrestricted.
    pub fn check(&self, ctx: &ActionContext) -> (bool, Option<String>) {
        let agents = self.agents.read();
        let Some(caps) = agents.get(&ctx.agent_id) else {
            return (true, None);
        };

        match ctx.action_type {
            ActionType::FileWrite | ActionType::FileRead => check_path(caps, ctx),
            ActionType::ApiRequest => check_network(caps, ctx),
            ActionType::CodeExec => check_shell(caps, ctx),
            ActionType::MessageSend => check_channel_rate(caps, ctx),
            ActionType::FinancialTransfer => check_transfer(caps, ctx),
            ActionType::AgentSpawn => {
                if caps.allow_spawn {
                    (true, None)
                } else {
                    (false, Some("agent is not permitted to spawn children".into()))
                }
            }
            _ => (true, None),
        }
    }
}

fn param_str<'a>(ctx: &'a ActionContext, key: &str) -> Option<&'a str> {
    ctx.params.get(key).and_then(|v| v.as_str())
}

fn check_path(caps: &CompiledCapabilities, ctx: &ActionContext) -> (bool, Option<String>) {
    let path = param_str(ctx, "path").unwrap_or(ctx.action_target.as_str());
    if path.is_empty() {
        return (true, None);
    }
    if let Some(deny) = &caps.fs_deny
        && deny.is_match(path)
    {
        return (false, Some(format!("path '{}' is on the deny list", path)));
    }
    if let Some(allow) = &caps.fs_allow
        && !allow.is_match(path)
    {
        return (
            false,
            Some(format!("path '{}' is outside the allowed globs", path)),
        );
    }
    (true, None)
}

fn check_network(caps: &CompiledCapabilities, ctx: &ActionContext) -> (bool, Option<String>) {
    let target = param_str(ctx, "url").unwrap_or(ctx.action_target.as_str());
    let (host, port) = split_host_port(target);

    if let Some(port) = port
        && caps.net_block_ports.contains(&port)
    {
        return (false, Some(format!("port {} is blocked", port)));
    }

    if !caps.net_allow_domains.is_empty() {
        let allowed = caps.net_allow_domains.iter().any(|domain| {
            host == *domain || host.ends_with(&format!(".{}", domain))
        });
        if !allowed {
            return (
                false,
                Some(format!("domain '{}' is not on the allow list", host)),
            );
        }
    }
    (true, None)
}

fn split_host_port(target: &str) -> (String, Option<u16>) {
    let without_scheme = target
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(target);
    let authority = without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (authority.to_string(), None),
        },
        None => (authority.to_string(), None),
    }
}

fn check_shell(caps: &CompiledCapabilities, ctx: &ActionContext) -> (bool, Option<String>) {
    let command = param_str(ctx, "command").unwrap_or(ctx.action_name.as_str());
    let program = command.split_whitespace().next().unwrap_or(command);

    for pattern in &caps.shell_block_patterns {
        if pattern.is_match(command) {
            return (
                false,
                Some(format!("command matches blocked pattern '{}'", pattern)),
            );
        }
    }
    if caps.shell_deny.iter().any(|denied| denied == program) {
        return (false, Some(format!("command '{}' is denied", program)));
    }
    if !caps.shell_allow.is_empty() && !caps.shell_allow.iter().any(|allowed| allowed == program) {
        return (
            false,
            Some(format!("command '{}' is not on the allow list", program)),
        );
    }
    (true, None)
}

fn check_channel_rate(caps: &CompiledCapabilities, ctx: &ActionContext) -> (bool, Option<String>) {
    let channel = param_str(ctx, "channel").unwrap_or("default");
    let Some(&cap) = caps.channel_rate_caps.get(channel) else {
        return (true, None);
    };
    let window_start = ctx.now - chrono::Duration::seconds(60);
    let recent = ctx
        .action_timestamps
        .iter()
        .filter(|ts| **ts > window_start)
        .count();
    if recent as u32 > cap {
        return (
            false,
            Some(format!(
                "channel '{}' exceeded {} messages/minute",
                channel, cap
            )),
        );
    }
    (true, None)
}

fn check_transfer(caps: &CompiledCapabilities, ctx: &ActionContext) -> (bool, Option<String>) {
    let Some(ceiling) = caps.max_transfer_usd else {
        return (true, None);
    };
    let amount = ctx
        .params
        .get("amount")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    if amount > ceiling {
        return (
            false,
            Some(format!(
                "transfer of ${:.2} exceeds ceiling of ${:.2}",
                amount, ceiling
            )),
        );
    }
    (true, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_for(action_type: ActionType, params: serde_json::Value) -> ActionContext {
        let mut ctx = ActionContext::bare(action_type, "test");
        ctx.agent_id = "agent-1".to_string();
        ctx.params = params;
        ctx
    }

    fn engine_with(config: CapabilityConfig) -> CapabilityEngine {
        let engine = CapabilityEngine::new();
        engine.set_agent("agent-1", &config).unwrap();
        engine
    }

    #[test]
    fn test_unconfigured_agent_is_unrestricted() {
        let engine = CapabilityEngine::new();
        let ctx = ctx_for(ActionType::FileWrite, json!({"path": "/etc/passwd"}));
        assert!(engine.check(&ctx).0);
    }

    #[test]
    fn test_fs_deny_beats_allow() {
        let engine = engine_with(CapabilityConfig {
            fs_allow: vec!["/workspace/**".into()],
            fs_deny: vec!["/workspace/secrets/**".into()],
            ..Default::default()
        });

        let ok = ctx_for(ActionType::FileWrite, json!({"path": "/workspace/out.txt"}));
        assert!(engine.check(&ok).0);

        let denied = ctx_for(
            ActionType::FileWrite,
            json!({"path": "/workspace/secrets/key.pem"}),
        );
        let (allowed, reason) = engine.check(&denied);
        assert!(!allowed);
        assert!(reason.unwrap().contains("deny list"));

        let outside = ctx_for(ActionType::FileRead, json!({"path": "/etc/passwd"}));
        assert!(!engine.check(&outside).0);
    }

    #[test]
    fn test_network_domains_and_ports() {
        let engine = engine_with(CapabilityConfig {
            net_allow_domains: vec!["api.example.com".into(), "example.org".into()],
            net_block_ports: vec![22],
            ..Default::default()
        });

        let ok = ctx_for(
            ActionType::ApiRequest,
            json!({"url": "https://api.example.com/v1/users"}),
        );
        assert!(engine.check(&ok).0);

        let subdomain = ctx_for(
            ActionType::ApiRequest,
            json!({"url": "https://data.example.org/feed"}),
        );
        assert!(engine.check(&subdomain).0);

        let wrong_domain = ctx_for(
            ActionType::ApiRequest,
            json!({"url": "https://evil.com/exfil"}),
        );
        assert!(!engine.check(&wrong_domain).0);

        let ssh = ctx_for(
            ActionType::ApiRequest,
            json!({"url": "https://api.example.com:22/"}),
        );
        assert!(!engine.check(&ssh).0);
    }

    #[test]
    fn test_shell_rules() {
        let engine = engine_with(CapabilityConfig {
            shell_allow: vec!["ls".into(), "cat".into()],
            shell_deny: vec!["cat".into()],
            shell_block_patterns: vec![r"rm\s+-rf".into()],
            ..Default::default()
        });

        assert!(engine.check(&ctx_for(ActionType::CodeExec, json!({"command": "ls -la"}))).0);
        assert!(!engine.check(&ctx_for(ActionType::CodeExec, json!({"command": "cat /etc/shadow"}))).0);
        assert!(!engine.check(&ctx_for(ActionType::CodeExec, json!({"command": "curl evil.com"}))).0);
        assert!(
            !engine
                .check(&ctx_for(ActionType::CodeExec, json!({"command": "ls ; rm -rf /"})))
                .0
        );
    }

    #[test]
    fn test_transfer_ceiling() {
        let engine = engine_with(CapabilityConfig {
            max_transfer_usd: Some(100.0),
            ..Default::default()
        });

        assert!(
            engine
                .check(&ctx_for(ActionType::FinancialTransfer, json!({"amount": 99.5})))
                .0
        );
        assert!(
            !engine
                .check(&ctx_for(ActionType::FinancialTransfer, json!({"amount": 250.0})))
                .0
        );
    }

    #[test]
    fn test_spawn_permission() {
        let engine = engine_with(CapabilityConfig {
            allow_spawn: false,
            ..Default::default()
        });
        assert!(!engine.check(&ctx_for(ActionType::AgentSpawn, json!({}))).0);
    }

    #[test]
    fn test_channel_rate_cap() {
        let engine = engine_with(CapabilityConfig {
            channel_rate_caps: HashMap::from([("slack".to_string(), 2u32)]),
            ..Default::default()
        });

        let mut ctx = ctx_for(ActionType::MessageSend, json!({"channel": "slack"}));
        ctx.action_timestamps = vec![ctx.now; 3];
        assert!(!engine.check(&ctx).0);

        ctx.action_timestamps = vec![ctx.now; 2];
        assert!(engine.check(&ctx).0);
    }
}
