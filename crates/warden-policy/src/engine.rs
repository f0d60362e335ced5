use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use warden_llm::{extract_json, ChatMessage, ChatRequest, LlmClient};
use warden_types::{ActionContext, ActionType, Verdict};

use crate::capability::CapabilityEngine;
use crate::invariants::InvariantEngine;
use crate::killswitch::KillSwitch;
use crate::rules::{rate_exceeded, CompiledRule, RuleSet, RuleType};
use crate::spawn::{SpawnConfig, SpawnGovernor};
use crate::{Error, Result};

/// What to do when the engine itself fails mid-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Deny on any uncaught evaluation error (safe default).
    #[default]
    Closed,
    /// Let the action pass when the engine fails.
    Open,
}

/// Instruction to park the action in the approval queue.
#[derive(Debug, Clone)]
pub struct ApprovalDirective {
    pub policy_name: String,
    pub approvers: Vec<String>,
    pub timeout_minutes: u64,
    pub timeout_effect: Verdict,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub policy_name: Option<String>,
    pub message: String,
    /// Set when verdict is `throttle`: the longest delay across matches.
    pub delay_seconds: Option<u64>,
    pub approval: Option<ApprovalDirective>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            policy_name: None,
            message: String::new(),
            delay_seconds: None,
            approval: None,
        }
    }

    fn terminal(verdict: Verdict, policy_name: &str, message: String) -> Self {
        Self {
            verdict,
            policy_name: Some(policy_name.to_string()),
            message,
            delay_seconds: None,
            approval: None,
        }
    }
}

/// The ordered evaluation pipeline:
/// kill-switch → capability → proxy invariants → spawn governor → rules.
///
/// The ruleset is copy-on-write: evaluations take an `Arc` snapshot at entry,
/// a reload publishes a fresh snapshot under the write lock. No evaluation
/// ever observes a half-replaced set.
pub struct PolicyEngine {
    ruleset: RwLock<Arc<RuleSet>>,
    kill_switch: Arc<KillSwitch>,
    capabilities: Arc<CapabilityEngine>,
    invariants: Arc<InvariantEngine>,
    spawn: Arc<SpawnGovernor>,
    judge: RwLock<Option<Arc<dyn LlmClient>>>,
    fail_mode: FailMode,
    judge_model: String,
    judge_timeout: Duration,
}

impl PolicyEngine {
    pub fn new(fail_mode: FailMode) -> Self {
        Self {
            ruleset: RwLock::new(Arc::new(RuleSet::empty())),
            kill_switch: Arc::new(KillSwitch::new()),
            capabilities: Arc::new(CapabilityEngine::new()),
            invariants: Arc::new(InvariantEngine::new()),
            spawn: Arc::new(SpawnGovernor::new(SpawnConfig::default())),
            judge: RwLock::new(None),
            fail_mode,
            judge_model: "gpt-4o-mini".to_string(),
            judge_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_spawn_config(mut self, config: SpawnConfig) -> Self {
        self.spawn = Arc::new(SpawnGovernor::new(config));
        self
    }

    pub fn with_judge(
        self,
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        *self.judge.write() = Some(client);
        Self {
            judge_model: model.into(),
            judge_timeout: timeout,
            ..self
        }
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn capabilities(&self) -> &Arc<CapabilityEngine> {
        &self.capabilities
    }

    pub fn invariants(&self) -> &Arc<InvariantEngine> {
        &self.invariants
    }

    pub fn spawn_governor(&self) -> &Arc<SpawnGovernor> {
        &self.spawn
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Atomically replace the ruleset. Callers compile first; a compile
    /// failure never reaches this point.
    pub fn install(&self, ruleset: RuleSet) {
        let count = ruleset.len();
        *self.ruleset.write() = Arc::new(ruleset);
        debug!(rules = count, "policy ruleset installed");
    }

    /// Compile-then-install. On compile error the running set is unchanged.
    pub fn reload(&self, configs: &[crate::rules::RuleConfig]) -> Result<usize> {
        let ruleset = RuleSet::compile(configs)?;
        let count = ruleset.len();
        self.install(ruleset);
        Ok(count)
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.ruleset.read().clone()
    }

    /// Evaluate one action. Never blocks except inside an ai-judge rule.
    pub fn evaluate(&self, ctx: &ActionContext) -> Decision {
        // 1. Kill switch: hard override, outside any LLM context.
        let (blocked, reason) = self.kill_switch.is_blocked(&ctx.agent_id, &ctx.session_id);
        if blocked {
            return Decision::terminal(
                Verdict::Terminate,
                "kill_switch",
                reason.unwrap_or_else(|| "kill switch active".into()),
            );
        }

        // 2. Capability boundary.
        let (allowed, reason) = self.capabilities.check(ctx);
        if !allowed {
            return Decision::terminal(
                Verdict::Deny,
                "capability",
                reason.unwrap_or_else(|| "capability denied".into()),
            );
        }

        // 3. Proxy-mode safety invariants.
        match self.invariants.check(ctx) {
            Ok(Some(hit)) => {
                return Decision::terminal(hit.effect, &hit.name, hit.message);
            }
            Ok(None) => {}
            Err(err) => {
                if let Some(decision) = self.engine_failure("invariants", &err) {
                    return decision;
                }
            }
        }

        // 4. Spawn governor.
        if ctx.action_type == ActionType::AgentSpawn {
            let (allowed, reason) = self.spawn.check(ctx);
            if !allowed {
                return Decision::terminal(
                    Verdict::Deny,
                    "spawn_governor",
                    reason.unwrap_or_else(|| "spawn denied".into()),
                );
            }
        }

        // 5. Policy rules, in declared order.
        let snapshot = self.snapshot();
        let mut throttle: Option<(u64, String, String)> = None;

        for rule in snapshot.rules() {
            match self.apply_rule(rule, ctx) {
                Ok(RuleOutcome::NoMatch) => {}
                Ok(RuleOutcome::Matched { message }) => {
                    if rule.effect == Verdict::Throttle {
                        let delay = rule.delay_seconds;
                        let longest = throttle
                            .as_ref()
                            .map(|(existing, _, _)| delay > *existing)
                            .unwrap_or(true);
                        if longest {
                            throttle = Some((delay, rule.name.clone(), message));
                        }
                        continue;
                    }
                    if rule.effect.is_short_circuit() {
                        let mut decision =
                            Decision::terminal(rule.effect, &rule.name, message);
                        if rule.effect == Verdict::Approve {
                            decision.approval = Some(ApprovalDirective {
                                policy_name: rule.name.clone(),
                                approvers: rule.approvers.clone(),
                                timeout_minutes: rule.timeout_minutes,
                                timeout_effect: rule.timeout_effect,
                            });
                        }
                        return decision;
                    }
                    // allow-effect rules match without ending evaluation
                }
                Err(err) => {
                    warn!(rule = %rule.name, error = %err, "rule evaluation failed");
                    if let Some(decision) = self.engine_failure(&rule.name, &err) {
                        return decision;
                    }
                }
            }
        }

        if let Some((delay, name, message)) = throttle {
            return Decision {
                verdict: Verdict::Throttle,
                policy_name: Some(name),
                message,
                delay_seconds: Some(delay),
                approval: None,
            };
        }

        Decision::allow()
    }

    /// Fail-mode handling: `closed` turns an engine fault into a deny,
    /// `open` skips the failing component.
    fn engine_failure(&self, component: &str, err: &Error) -> Option<Decision> {
        match self.fail_mode {
            FailMode::Closed => Some(Decision::terminal(
                Verdict::Deny,
                component,
                format!("policy engine error (fail closed): {}", err),
            )),
            FailMode::Open => None,
        }
    }

    fn apply_rule(&self, rule: &CompiledRule, ctx: &ActionContext) -> Result<RuleOutcome> {
        match rule.rule_type {
            RuleType::Expression | RuleType::Budget => {
                // Compilation guarantees a condition for these rule types.
                let matched = match &rule.condition {
                    Some(condition) => condition.matches(ctx)?,
                    None => false,
                };
                if matched {
                    Ok(RuleOutcome::Matched {
                        message: rule_message(rule),
                    })
                } else {
                    Ok(RuleOutcome::NoMatch)
                }
            }
            RuleType::RateLimit => {
                if let Some(condition) = &rule.condition
                    && !condition.matches(ctx)?
                {
                    return Ok(RuleOutcome::NoMatch);
                }
                if rate_exceeded(
                    &ctx.action_timestamps,
                    ctx.now,
                    rule.window_seconds,
                    rule.max_per_window,
                ) {
                    Ok(RuleOutcome::Matched {
                        message: rule_message(rule),
                    })
                } else {
                    Ok(RuleOutcome::NoMatch)
                }
            }
            RuleType::AiJudge => self.apply_judge(rule, ctx),
            RuleType::Approval => {
                if let Some(condition) = &rule.condition
                    && !condition.matches(ctx)?
                {
                    return Ok(RuleOutcome::NoMatch);
                }
                Ok(RuleOutcome::Matched {
                    message: rule_message(rule),
                })
            }
        }
    }

    fn apply_judge(&self, rule: &CompiledRule, ctx: &ActionContext) -> Result<RuleOutcome> {
        if let Some(condition) = &rule.condition
            && !condition.matches(ctx)?
        {
            return Ok(RuleOutcome::NoMatch);
        }

        let client = self
            .judge
            .read()
            .clone()
            .ok_or_else(|| Error::Eval("no judge client configured".into()))?;

        let mut system = String::from(
            "You are a governance judge for AI agent actions. Decide whether the \
             action below may proceed. Reply with JSON: {\"allow\": bool, \"reason\": string}.",
        );
        if let Some(context) = &rule.context {
            system.push_str("\n\nPolicy context:\n");
            system.push_str(context);
        }
        system.push_str("\n\nPolicy instruction:\n");
        system.push_str(&rule.prompt);

        let action = serde_json::json!({
            "type": ctx.action_type.as_str(),
            "name": ctx.action_name,
            "target": ctx.action_target,
            "params": ctx.params,
            "session_cost": ctx.session_cost,
            "agent_id": ctx.agent_id,
        });

        let model = rule.model.clone().unwrap_or_else(|| self.judge_model.clone());
        let request = ChatRequest::new(
            model,
            vec![
                ChatMessage::system(system),
                ChatMessage::user(action.to_string()),
            ],
        )
        .with_timeout(self.judge_timeout);

        let reply = client.complete(&request)?;
        let verdict = extract_json(&reply)?;
        let allow = verdict
            .get("allow")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Error::Eval("judge reply missing 'allow' field".into()))?;

        if allow {
            Ok(RuleOutcome::NoMatch)
        } else {
            let reason = verdict
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("judge denied the action")
                .to_string();
            Ok(RuleOutcome::Matched { message: reason })
        }
    }
}

enum RuleOutcome {
    NoMatch,
    Matched { message: String },
}

fn rule_message(rule: &CompiledRule) -> String {
    if rule.message.is_empty() {
        format!("matched policy rule '{}'", rule.name)
    } else {
        rule.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_llm::MockLlm;
    use warden_types::ActionType;

    use crate::killswitch::{KillScope, KillSource};
    use crate::rules::{PolicyDocument, RuleConfig};

    fn parse_rules(yaml: &str) -> Vec<RuleConfig> {
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        doc.rules
    }

    fn ctx() -> ActionContext {
        let mut ctx = ActionContext::bare(ActionType::ToolCall, "shell_exec");
        ctx.session_id = "ses_1".to_string();
        ctx.agent_id = "agent-1".to_string();
        ctx
    }

    #[test]
    fn test_budget_terminate_scenario() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: budget
    type: budget
    condition: "session.cost > 10.0"
    effect: terminate
    message: Session budget exceeded
"#,
            ))
            .unwrap();

        let mut context = ctx();
        context.session_cost = 10.01;
        let decision = engine.evaluate(&context);
        assert_eq!(decision.verdict, Verdict::Terminate);
        assert_eq!(decision.policy_name.as_deref(), Some("budget"));

        context.session_cost = 9.99;
        assert_eq!(engine.evaluate(&context).verdict, Verdict::Allow);
    }

    #[test]
    fn test_shell_block_scenario() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: no-shell
    condition: 'action.type == "tool.call" && action.name == "shell_exec"'
    effect: deny
"#,
            ))
            .unwrap();

        assert_eq!(engine.evaluate(&ctx()).verdict, Verdict::Deny);

        let mut search = ctx();
        search.action_name = "search".to_string();
        assert_eq!(engine.evaluate(&search).verdict, Verdict::Allow);
    }

    #[test]
    fn test_first_short_circuit_wins() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: first
    condition: 'action.name == "shell_exec"'
    effect: deny
    message: first wins
  - name: second
    condition: 'action.name == "shell_exec"'
    effect: terminate
"#,
            ))
            .unwrap();

        let decision = engine.evaluate(&ctx());
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.policy_name.as_deref(), Some("first"));
    }

    #[test]
    fn test_throttle_accumulates_longest_delay() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: slow-a
    condition: 'action.type == "tool.call"'
    effect: throttle
    delay_seconds: 3
  - name: slow-b
    condition: 'action.name == "shell_exec"'
    effect: throttle
    delay_seconds: 9
"#,
            ))
            .unwrap();

        let decision = engine.evaluate(&ctx());
        assert_eq!(decision.verdict, Verdict::Throttle);
        assert_eq!(decision.delay_seconds, Some(9));
        assert_eq!(decision.policy_name.as_deref(), Some("slow-b"));
    }

    #[test]
    fn test_kill_switch_precedes_rules() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: allow-everything
    condition: "false"
    effect: deny
"#,
            ))
            .unwrap();

        engine
            .kill_switch()
            .trigger(KillScope::Global, None, "drill", KillSource::Api);
        let decision = engine.evaluate(&ctx());
        assert_eq!(decision.verdict, Verdict::Terminate);
        assert_eq!(decision.policy_name.as_deref(), Some("kill_switch"));

        engine
            .kill_switch()
            .reset(KillScope::Global, None, KillSource::Api);
        assert_eq!(engine.evaluate(&ctx()).verdict, Verdict::Allow);
    }

    #[test]
    fn test_fail_closed_denies_on_eval_error() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: dynamic
    condition: 'action.params.get("n", "x") > 5'
"#,
            ))
            .unwrap();

        let mut context = ctx();
        context.params = json!({"n": "not-a-number"});
        let decision = engine.evaluate(&context);
        assert_eq!(decision.verdict, Verdict::Deny);
        assert!(decision.message.contains("fail closed"));
    }

    #[test]
    fn test_fail_open_allows_on_eval_error() {
        let engine = PolicyEngine::new(FailMode::Open);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: dynamic
    condition: 'action.params.get("n", "x") > 5'
"#,
            ))
            .unwrap();

        let mut context = ctx();
        context.params = json!({"n": "not-a-number"});
        assert_eq!(engine.evaluate(&context).verdict, Verdict::Allow);
    }

    #[test]
    fn test_judge_deny_and_fail_modes() {
        let mock = Arc::new(MockLlm::new(r#"{"allow": true}"#));
        let engine = PolicyEngine::new(FailMode::Closed).with_judge(
            mock.clone(),
            "test-model",
            Duration::from_secs(5),
        );
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: judge
    type: ai-judge
    prompt: "Block anything touching credentials."
"#,
            ))
            .unwrap();

        // allow → evaluation continues → overall allow
        assert_eq!(engine.evaluate(&ctx()).verdict, Verdict::Allow);

        // deny with reason
        mock.push_reply(r#"{"allow": false, "reason": "touches credentials"}"#);
        let decision = engine.evaluate(&ctx());
        assert_eq!(decision.verdict, Verdict::Deny);
        assert!(decision.message.contains("credentials"));

        // upstream failure → fail closed → deny
        mock.fail_next("provider down");
        assert_eq!(engine.evaluate(&ctx()).verdict, Verdict::Deny);
    }

    #[test]
    fn test_judge_failure_fail_open() {
        let mock = Arc::new(MockLlm::new(r#"{"allow": true}"#));
        let engine = PolicyEngine::new(FailMode::Open).with_judge(
            mock.clone(),
            "test-model",
            Duration::from_secs(5),
        );
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: judge
    type: ai-judge
    prompt: "irrelevant"
"#,
            ))
            .unwrap();

        mock.fail_next("provider down");
        assert_eq!(engine.evaluate(&ctx()).verdict, Verdict::Allow);
    }

    #[test]
    fn test_approval_directive() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: manual-review
    type: approval
    condition: 'action.type == "tool.call"'
    approvers: [ops@example.com]
    timeout_minutes: 15
    timeout_effect: deny
"#,
            ))
            .unwrap();

        let decision = engine.evaluate(&ctx());
        assert_eq!(decision.verdict, Verdict::Approve);
        let directive = decision.approval.unwrap();
        assert_eq!(directive.policy_name, "manual-review");
        assert_eq!(directive.timeout_minutes, 15);
        assert_eq!(directive.timeout_effect, Verdict::Deny);
    }

    #[test]
    fn test_reload_failure_keeps_old_set() {
        let engine = PolicyEngine::new(FailMode::Closed);
        engine
            .reload(&parse_rules(
                r#"
rules:
  - name: no-shell
    condition: 'action.name == "shell_exec"'
"#,
            ))
            .unwrap();

        let bad = parse_rules(
            r#"
rules:
  - name: broken
    condition: 'session.invalid > 0'
"#,
        );
        assert!(engine.reload(&bad).is_err());

        // Old rule still effective.
        assert_eq!(engine.evaluate(&ctx()).verdict, Verdict::Deny);
    }

    #[test]
    fn test_spawn_governor_in_pipeline() {
        let engine = PolicyEngine::new(FailMode::Closed).with_spawn_config(SpawnConfig {
            max_children_per_parent: 1,
            ..Default::default()
        });

        let mut spawn_ctx = ctx();
        spawn_ctx.action_type = ActionType::AgentSpawn;
        assert_eq!(engine.evaluate(&spawn_ctx).verdict, Verdict::Allow);

        engine.spawn_governor().record_spawn("agent-1", "child-1");
        let decision = engine.evaluate(&spawn_ctx);
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.policy_name.as_deref(), Some("spawn_governor"));
    }
}
