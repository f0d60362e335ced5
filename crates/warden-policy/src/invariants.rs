use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;

use warden_types::{ActionContext, Verdict};

use crate::expr::CompiledExpr;
use crate::Result;

/// How an invariant is enforced.
///
/// `Proxy` invariants are evaluated on every action and cannot be defeated by
/// context compaction; `Inject` invariants only add advisory text to the
/// agent's system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Proxy,
    Inject,
    Both,
}

impl EnforcementMode {
    pub fn enforced_in_proxy(&self) -> bool {
        matches!(self, EnforcementMode::Proxy | EnforcementMode::Both)
    }

    pub fn injected(&self) -> bool {
        matches!(self, EnforcementMode::Inject | EnforcementMode::Both)
    }
}

/// Per-agent assertion that must hold regardless of prompt content.
/// The condition describes the VIOLATION: when it matches, the effect fires.
#[derive(Debug, Clone, Deserialize)]
pub struct InvariantConfig {
    pub name: String,
    pub condition: String,
    #[serde(default = "default_mode")]
    pub mode: EnforcementMode,
    #[serde(default = "default_effect")]
    pub effect: Verdict,
    #[serde(default)]
    pub message: String,
}

fn default_mode() -> EnforcementMode {
    EnforcementMode::Proxy
}

fn default_effect() -> Verdict {
    Verdict::Deny
}

struct CompiledInvariant {
    name: String,
    condition: CompiledExpr,
    mode: EnforcementMode,
    effect: Verdict,
    message: String,
}

/// Violation of a proxy-mode invariant.
#[derive(Debug, Clone)]
pub struct InvariantHit {
    pub name: String,
    pub effect: Verdict,
    pub message: String,
}

pub struct InvariantEngine {
    agents: RwLock<HashMap<String, Vec<CompiledInvariant>>>,
}

impl Default for InvariantEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantEngine {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_agent(&self, agent_id: &str, configs: &[InvariantConfig]) -> Result<()> {
        let mut compiled = Vec::with_capacity(configs.len());
        for config in configs {
            compiled.push(CompiledInvariant {
                name: config.name.clone(),
                condition: CompiledExpr::compile(&config.condition)?,
                mode: config.mode,
                effect: config.effect,
                message: if config.message.is_empty() {
                    format!("safety invariant '{}' violated", config.name)
                } else {
                    config.message.clone()
                },
            });
        }
        self.agents.write().insert(agent_id.to_string(), compiled);
        Ok(())
    }

    /// Evaluate proxy-mode invariants. Returns the first violation, if any;
    /// evaluation errors bubble up for fail-mode handling.
    pub fn check(&self, ctx: &ActionContext) -> Result<Option<InvariantHit>> {
        let agents = self.agents.read();
        let Some(invariants) = agents.get(&ctx.agent_id) else {
            return Ok(None);
        };
        for invariant in invariants {
            if !invariant.mode.enforced_in_proxy() {
                continue;
            }
            if invariant.condition.matches(ctx)? {
                return Ok(Some(InvariantHit {
                    name: invariant.name.clone(),
                    effect: invariant.effect,
                    message: invariant.message.clone(),
                }));
            }
        }
        Ok(None)
    }

    /// Advisory lines for the agent's system prompt (inject / both modes).
    pub fn inject_lines(&self, agent_id: &str) -> Vec<String> {
        let agents = self.agents.read();
        let Some(invariants) = agents.get(agent_id) else {
            return Vec::new();
        };
        invariants
            .iter()
            .filter(|inv| inv.mode.injected())
            .map(|inv| format!("- {} ({})", inv.message, inv.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_types::ActionType;

    #[test]
    fn test_proxy_invariant_fires_on_violation() {
        let engine = InvariantEngine::new();
        engine
            .set_agent(
                "agent-1",
                &[InvariantConfig {
                    name: "no-prod-writes".into(),
                    condition: r#"action.type == "db.query" && action.target == "prod""#.into(),
                    mode: EnforcementMode::Proxy,
                    effect: Verdict::Terminate,
                    message: String::new(),
                }],
            )
            .unwrap();

        let mut ctx = ActionContext::bare(ActionType::DbQuery, "update");
        ctx.agent_id = "agent-1".to_string();
        ctx.action_target = "prod".to_string();

        let hit = engine.check(&ctx).unwrap().unwrap();
        assert_eq!(hit.effect, Verdict::Terminate);
        assert!(hit.message.contains("no-prod-writes"));

        ctx.action_target = "staging".to_string();
        assert!(engine.check(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_inject_mode_not_proxied_but_rendered() {
        let engine = InvariantEngine::new();
        engine
            .set_agent(
                "agent-1",
                &[InvariantConfig {
                    name: "be-polite".into(),
                    condition: r#"action.params.get("tone", "") == "rude""#.into(),
                    mode: EnforcementMode::Inject,
                    effect: Verdict::Deny,
                    message: "Always keep a professional tone".into(),
                }],
            )
            .unwrap();

        let mut ctx = ActionContext::bare(ActionType::MessageSend, "send");
        ctx.agent_id = "agent-1".to_string();
        ctx.params = json!({"tone": "rude"});
        assert!(engine.check(&ctx).unwrap().is_none());

        let lines = engine.inject_lines("agent-1");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("professional tone"));
    }

    #[test]
    fn test_bad_condition_rejected_at_load() {
        let engine = InvariantEngine::new();
        let result = engine.set_agent(
            "agent-1",
            &[InvariantConfig {
                name: "broken".into(),
                condition: "session.nonexistent > 1".into(),
                mode: EnforcementMode::Proxy,
                effect: Verdict::Deny,
                message: String::new(),
            }],
        );
        assert!(result.is_err());
    }
}
