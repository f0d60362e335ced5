use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;

use warden_types::ActionContext;

/// Limits on agent.spawn, enforced by the spawn governor.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnConfig {
    #[serde(default = "default_children_per_parent")]
    pub max_children_per_parent: usize,
    #[serde(default = "default_total")]
    pub max_total: usize,
    #[serde(default = "default_depth")]
    pub max_depth: usize,
    /// Fraction of the parent's remaining budget a child inherits.
    #[serde(default = "default_budget_fraction")]
    pub budget_inheritance_fraction: f64,
    /// Terminate of a parent propagates to all descendants.
    #[serde(default)]
    pub cascade_kill: bool,
}

fn default_children_per_parent() -> usize {
    5
}
fn default_total() -> usize {
    25
}
fn default_depth() -> usize {
    3
}
fn default_budget_fraction() -> f64 {
    0.5
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            max_children_per_parent: default_children_per_parent(),
            max_total: default_total(),
            max_depth: default_depth(),
            budget_inheritance_fraction: default_budget_fraction(),
            cascade_kill: false,
        }
    }
}

#[derive(Default)]
struct SpawnState {
    children: HashMap<String, Vec<String>>,
    depth: HashMap<String, usize>,
    total: usize,
}

/// Tracks the spawn tree and enforces child/total/depth caps on
/// `agent.spawn` actions.
pub struct SpawnGovernor {
    config: SpawnConfig,
    state: RwLock<SpawnState>,
}

impl SpawnGovernor {
    pub fn new(config: SpawnConfig) -> Self {
        Self {
            config,
            state: RwLock::new(SpawnState::default()),
        }
    }

    pub fn config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Check an agent.spawn action. The spawning agent is the parent.
    pub fn check(&self, ctx: &ActionContext) -> (bool, Option<String>) {
        let state = self.state.read();

        if state.total >= self.config.max_total {
            return (
                false,
                Some(format!(
                    "global spawn cap reached ({} live children)",
                    self.config.max_total
                )),
            );
        }

        let child_count = state
            .children
            .get(&ctx.agent_id)
            .map(Vec::len)
            .unwrap_or(0);
        if child_count >= self.config.max_children_per_parent {
            return (
                false,
                Some(format!(
                    "agent '{}' already has {} children",
                    ctx.agent_id, child_count
                )),
            );
        }

        let parent_depth = state.depth.get(&ctx.agent_id).copied().unwrap_or(0);
        if parent_depth + 1 > self.config.max_depth {
            return (
                false,
                Some(format!("spawn depth cap of {} reached", self.config.max_depth)),
            );
        }

        (true, None)
    }

    /// Record an allowed spawn. Child depth is parent depth + 1.
    pub fn record_spawn(&self, parent_id: &str, child_id: &str) {
        let mut state = self.state.write();
        let parent_depth = state.depth.get(parent_id).copied().unwrap_or(0);
        state
            .children
            .entry(parent_id.to_string())
            .or_default()
            .push(child_id.to_string());
        state.depth.insert(child_id.to_string(), parent_depth + 1);
        state.total += 1;
    }

    /// Budget a child inherits from its parent's remaining budget.
    pub fn child_budget(&self, parent_remaining: f64) -> f64 {
        (parent_remaining * self.config.budget_inheritance_fraction).max(0.0)
    }

    /// All transitive descendants of an agent (cascade-kill targets).
    pub fn descendants(&self, agent_id: &str) -> Vec<String> {
        let state = self.state.read();
        let mut result = Vec::new();
        let mut queue = vec![agent_id.to_string()];
        while let Some(current) = queue.pop() {
            if let Some(children) = state.children.get(&current) {
                for child in children {
                    result.push(child.clone());
                    queue.push(child.clone());
                }
            }
        }
        result
    }

    pub fn cascade_kill_enabled(&self) -> bool {
        self.config.cascade_kill
    }

    pub fn release(&self, child_id: &str) {
        let mut state = self.state.write();
        if state.depth.remove(child_id).is_some() {
            state.total = state.total.saturating_sub(1);
        }
        for children in state.children.values_mut() {
            children.retain(|c| c != child_id);
        }
    }
}
