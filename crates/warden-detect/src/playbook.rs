use std::path::Path;
use std::time::Duration;
use tracing::debug;

use warden_llm::{extract_json, ChatMessage, ChatRequest, LlmClient};

use crate::detectors::Detection;
use crate::events::{ActionEvent, DetectorAction};

/// Playbook file for a detector: `playbooks/LOOP.md`, `COST_ANOMALY.md`, …
pub fn playbook_file_name(detector: &str) -> String {
    format!("{}.md", detector.to_uppercase())
}

/// Ask the LLM which action the playbook recommends for this detection.
/// Any failure (missing file, provider error, unusable reply) surfaces as an
/// error; the engine then applies the detector's fallback action.
pub fn run_playbook(
    client: &dyn LlmClient,
    playbooks_dir: &Path,
    detector: &str,
    model: &str,
    timeout: Duration,
    detection: &Detection,
    event: &ActionEvent,
) -> anyhow::Result<DetectorAction> {
    let path = playbooks_dir.join(playbook_file_name(detector));
    let playbook = std::fs::read_to_string(&path)?;

    let system = format!(
        "You are an incident responder for AI agent anomalies. Follow the \
         playbook below and choose exactly one action for this event. Reply \
         with JSON: {{\"action\": \"alert\"|\"pause\"|\"terminate\"}}.\n\n{}",
        playbook
    );
    let user = serde_json::json!({
        "detector": detector,
        "message": detection.message,
        "details": detection.details,
        "session_id": event.session_id,
        "agent_id": event.agent_id,
        "action_type": event.action_type.as_str(),
        "action_name": event.action_name,
    });

    let request = ChatRequest::new(
        model,
        vec![ChatMessage::system(system), ChatMessage::user(user.to_string())],
    )
    .with_timeout(timeout);

    let reply = client.complete(&request)?;
    let parsed = extract_json(&reply)?;
    let action = parsed
        .get("action")
        .and_then(|v| v.as_str())
        .and_then(DetectorAction::parse)
        .ok_or_else(|| anyhow::anyhow!("playbook reply has no usable action: {}", reply))?;

    if action == DetectorAction::Playbook {
        anyhow::bail!("playbook cannot recommend itself");
    }
    debug!(detector, action = action.as_str(), "playbook resolved");
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_llm::MockLlm;
    use warden_types::ActionType;

    fn detection() -> Detection {
        Detection {
            message: "loop detected".to_string(),
            details: serde_json::json!({"repeats": 5}),
            action: DetectorAction::Playbook,
        }
    }

    fn event() -> ActionEvent {
        ActionEvent {
            session_id: "ses_1".to_string(),
            agent_id: "agent-1".to_string(),
            action_type: ActionType::ToolCall,
            action_name: "search".to_string(),
            model: None,
            cost_usd: 0.0,
            output: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_playbook_resolution() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("LOOP.md"), "# Loop playbook\nPause on repeats.").unwrap();

        let mock = MockLlm::new(r#"{"action": "pause"}"#);
        let action = run_playbook(
            &mock,
            tmp.path(),
            "loop",
            "test-model",
            Duration::from_secs(5),
            &detection(),
            &event(),
        )
        .unwrap();
        assert_eq!(action, DetectorAction::Pause);

        // The playbook text reaches the model.
        let request = mock.last_request().unwrap();
        assert!(request.messages[0].content.contains("Pause on repeats"));
    }

    #[test]
    fn test_missing_playbook_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mock = MockLlm::new(r#"{"action": "pause"}"#);
        let result = run_playbook(
            &mock,
            tmp.path(),
            "loop",
            "test-model",
            Duration::from_secs(5),
            &detection(),
            &event(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unusable_reply_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("LOOP.md"), "playbook").unwrap();

        let mock = MockLlm::new(r#"{"action": "self_destruct"}"#);
        let result = run_playbook(
            &mock,
            tmp.path(),
            "loop",
            "test-model",
            Duration::from_secs(5),
            &detection(),
            &event(),
        );
        assert!(result.is_err());
    }
}
