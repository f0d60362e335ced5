use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;

use warden_types::Verdict;

use crate::expr::CompiledExpr;
use crate::{Error, Result};

/// Kind of policy rule. `expression` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    #[default]
    Expression,
    AiJudge,
    Approval,
    Budget,
    RateLimit,
}

/// One `policy.yaml` document: `policies/<name>/policy.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<RuleConfig>,
}

/// Declarative rule as written in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub rule_type: RuleType,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub effect: Option<Verdict>,
    #[serde(default)]
    pub message: String,

    // throttle
    #[serde(default)]
    pub delay_seconds: Option<u64>,

    // rate-limit
    #[serde(default)]
    pub max_per_window: Option<u32>,
    #[serde(default)]
    pub window_seconds: Option<u64>,

    // ai-judge
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// POLICY.md content, attached by the loader when present.
    #[serde(default)]
    pub context: Option<String>,

    // approval
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    #[serde(default)]
    pub timeout_effect: Option<Verdict>,
}

/// A rule after compilation: condition parsed, defaults resolved.
pub struct CompiledRule {
    pub name: String,
    pub rule_type: RuleType,
    pub effect: Verdict,
    pub message: String,
    pub condition: Option<CompiledExpr>,
    pub delay_seconds: u64,
    pub max_per_window: u32,
    pub window_seconds: u64,
    pub prompt: String,
    pub model: Option<String>,
    pub context: Option<String>,
    pub approvers: Vec<String>,
    pub timeout_minutes: u64,
    pub timeout_effect: Verdict,
}

/// Ordered, immutable ruleset. Published as a snapshot; a reload swaps the
/// whole set atomically or not at all.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn compile(configs: &[RuleConfig]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(configs.len());
        for config in configs {
            if !seen.insert(config.name.clone()) {
                return Err(Error::Compile(format!(
                    "duplicate rule name '{}'",
                    config.name
                )));
            }
            rules.push(compile_rule(config)?);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(config: &RuleConfig) -> Result<CompiledRule> {
    let condition = match &config.condition {
        Some(source) => Some(CompiledExpr::compile(source).map_err(|e| {
            Error::Compile(format!("rule '{}': {}", config.name, e))
        })?),
        None => None,
    };

    let effect = config.effect.unwrap_or(match config.rule_type {
        RuleType::Expression => Verdict::Deny,
        RuleType::AiJudge => Verdict::Deny,
        RuleType::Approval => Verdict::Approve,
        RuleType::Budget => Verdict::Terminate,
        RuleType::RateLimit => Verdict::Throttle,
    });

    match config.rule_type {
        RuleType::Expression | RuleType::Budget => {
            if condition.is_none() {
                return Err(Error::Compile(format!(
                    "rule '{}' requires a condition",
                    config.name
                )));
            }
        }
        RuleType::RateLimit => {
            if config.max_per_window.is_none() {
                return Err(Error::Compile(format!(
                    "rate-limit rule '{}' requires max_per_window",
                    config.name
                )));
            }
        }
        RuleType::AiJudge => {
            if config.prompt.as_deref().unwrap_or("").is_empty() {
                return Err(Error::Compile(format!(
                    "ai-judge rule '{}' requires a prompt",
                    config.name
                )));
            }
        }
        RuleType::Approval => {
            if effect != Verdict::Approve {
                return Err(Error::Compile(format!(
                    "approval rule '{}' cannot have effect '{}'",
                    config.name, effect
                )));
            }
        }
    }

    Ok(CompiledRule {
        name: config.name.clone(),
        rule_type: config.rule_type,
        effect,
        message: config.message.clone(),
        condition,
        delay_seconds: config.delay_seconds.unwrap_or(5),
        max_per_window: config.max_per_window.unwrap_or(0),
        window_seconds: config.window_seconds.unwrap_or(60),
        prompt: config.prompt.clone().unwrap_or_default(),
        model: config.model.clone(),
        context: config.context.clone(),
        approvers: config.approvers.clone(),
        timeout_minutes: config.timeout_minutes.unwrap_or(30),
        timeout_effect: config.timeout_effect.unwrap_or(Verdict::Deny),
    })
}

/// Sliding-window rate check over per-action-type timestamps, counted in
/// 1-second buckets.
pub(crate) fn rate_exceeded(
    timestamps: &[DateTime<Utc>],
    now: DateTime<Utc>,
    window_seconds: u64,
    max_per_window: u32,
) -> bool {
    let now_bucket = now.timestamp();
    let window_start = now_bucket - window_seconds as i64 + 1;
    let count = timestamps
        .iter()
        .filter(|ts| {
            let bucket = ts.timestamp();
            bucket >= window_start && bucket <= now_bucket
        })
        .count();
    count as u32 > max_per_window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expression_rule(name: &str, condition: &str) -> RuleConfig {
        RuleConfig {
            name: name.to_string(),
            rule_type: RuleType::Expression,
            condition: Some(condition.to_string()),
            effect: None,
            message: String::new(),
            delay_seconds: None,
            max_per_window: None,
            window_seconds: None,
            prompt: None,
            model: None,
            context: None,
            approvers: Vec::new(),
            timeout_minutes: None,
            timeout_effect: None,
        }
    }

    #[test]
    fn test_compile_defaults() {
        let set = RuleSet::compile(&[expression_rule("block", "session.cost > 1.0")]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.rules()[0].effect, Verdict::Deny);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let rules = [
            expression_rule("same", "session.cost > 1.0"),
            expression_rule("same", "session.cost > 2.0"),
        ];
        assert!(RuleSet::compile(&rules).is_err());
    }

    #[test]
    fn test_bad_condition_rejects_whole_set() {
        let rules = [
            expression_rule("good", "session.cost > 1.0"),
            expression_rule("bad", "session.oops > 1.0"),
        ];
        assert!(RuleSet::compile(&rules).is_err());
    }

    #[test]
    fn test_yaml_document_parses() {
        let yaml = r#"
name: safety
description: baseline rules
rules:
  - name: budget
    type: budget
    condition: "session.cost > 10.0"
    effect: terminate
    message: Session budget exceeded
  - name: rate-tools
    type: rate-limit
    max_per_window: 10
    window_seconds: 60
    delay_seconds: 5
  - name: judge
    type: ai-judge
    prompt: "Is this action risky?"
    model: gpt-4o-mini
  - name: manual
    type: approval
    approvers: [ops@example.com]
    timeout_minutes: 15
    timeout_effect: deny
"#;
        let doc: PolicyDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.rules.len(), 4);
        let set = RuleSet::compile(&doc.rules).unwrap();
        assert_eq!(set.rules()[0].effect, Verdict::Terminate);
        assert_eq!(set.rules()[1].rule_type, RuleType::RateLimit);
        assert_eq!(set.rules()[3].timeout_minutes, 15);
    }

    #[test]
    fn test_rate_window_buckets() {
        let now = Utc::now();
        let timestamps: Vec<_> = (0..5)
            .map(|i| now - chrono::Duration::seconds(i * 10))
            .collect();

        // 5 events in the last 41s; window of 60s with cap 4 → exceeded
        assert!(rate_exceeded(&timestamps, now, 60, 4));
        // cap 5 → not exceeded
        assert!(!rate_exceeded(&timestamps, now, 60, 5));
        // shorter window sees fewer events
        assert!(!rate_exceeded(&timestamps, now, 15, 4));
    }

    #[test]
    fn test_judge_requires_prompt() {
        let mut rule = expression_rule("j", "session.cost > 1.0");
        rule.rule_type = RuleType::AiJudge;
        rule.condition = None;
        assert!(RuleSet::compile(&[rule]).is_err());
    }
}
