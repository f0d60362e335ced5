use serde::{Deserialize, Serialize};
use std::time::Duration;

use warden_llm::{extract_json, ChatMessage, ChatRequest, LlmClient};
use warden_types::Trace;

use crate::score::VersionScore;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub description: String,
    #[serde(default)]
    pub example: Option<String>,
}

/// Structured result of the analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub patterns: Vec<FailurePattern>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: Priority,
}

fn default_priority() -> Priority {
    Priority::Low
}

/// Ask the model to enumerate failure patterns for an agent, given its
/// charter (AGENT.md), evolution guidance (EVOLVE.md), current prompt,
/// metrics, and a sample of recent failures.
#[allow(clippy::too_many_arguments)]
pub fn analyze_agent(
    client: &dyn LlmClient,
    model: &str,
    timeout: Duration,
    agent_doc: &str,
    evolve_doc: &str,
    current_prompt: &str,
    score: &VersionScore,
    failures: &[Trace],
) -> Result<Analysis> {
    let failure_samples: Vec<serde_json::Value> = failures
        .iter()
        .map(|t| {
            serde_json::json!({
                "action_type": t.action_type.as_str(),
                "action_name": t.action_name,
                "status": t.status.as_str(),
                "policy": t.policy_name,
                "reason": t.policy_reason,
                "request_excerpt": t.request_body.chars().take(400).collect::<String>(),
            })
        })
        .collect();

    let system = "You analyze the failures of an AI agent and answer with JSON only: \
                  {\"patterns\": [{\"description\": string, \"example\": string|null}], \
                  \"recommendations\": [string], \"priority\": \"low\"|\"medium\"|\"high\"}. \
                  An empty patterns list means the agent is healthy.";

    let user = format!(
        "# Agent charter\n{}\n\n# Evolution guidance\n{}\n\n# Current system prompt\n{}\n\n\
         # Metrics (scoring window)\n{}\n\n# Recent failures\n{}",
        agent_doc,
        evolve_doc,
        current_prompt,
        serde_json::to_string_pretty(score).unwrap_or_default(),
        serde_json::to_string_pretty(&failure_samples).unwrap_or_default(),
    );

    let request = ChatRequest::new(
        model,
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .with_timeout(timeout);

    let reply = client.complete(&request)?;
    let parsed = extract_json(&reply)?;
    serde_json::from_value(parsed)
        .map_err(|e| Error::Llm(warden_llm::Error::Malformed(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::aggregate;
    use warden_llm::MockLlm;

    #[test]
    fn test_analysis_parses_structured_reply() {
        let mock = MockLlm::new(
            r#"```json
{"patterns": [{"description": "retries web search in a tight loop"}],
 "recommendations": ["add a search budget to the prompt"],
 "priority": "high"}
```"#,
        );

        let score = aggregate("a1", &[]);
        let analysis = analyze_agent(
            &mock,
            "test-model",
            Duration::from_secs(5),
            "charter",
            "guidance",
            "prompt",
            &score,
            &[],
        )
        .unwrap();

        assert_eq!(analysis.patterns.len(), 1);
        assert_eq!(analysis.priority, Priority::High);
        assert_eq!(analysis.recommendations.len(), 1);
    }

    #[test]
    fn test_healthy_agent_has_no_patterns() {
        let mock = MockLlm::new(r#"{"patterns": [], "recommendations": [], "priority": "low"}"#);
        let score = aggregate("a1", &[]);
        let analysis = analyze_agent(
            &mock,
            "test-model",
            Duration::from_secs(5),
            "",
            "",
            "",
            &score,
            &[],
        )
        .unwrap();
        assert!(analysis.patterns.is_empty());
    }

    #[test]
    fn test_llm_failure_propagates() {
        let mock = MockLlm::new("{}");
        mock.fail_next("down");
        let score = aggregate("a1", &[]);
        let result = analyze_agent(
            &mock,
            "test-model",
            Duration::from_secs(5),
            "",
            "",
            "",
            &score,
            &[],
        );
        assert!(matches!(result, Err(Error::Llm(_))));
    }
}
