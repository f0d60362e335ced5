use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Default per-call deadline. Every LLM call is bounded; a hung provider
/// must never stall a policy evaluation or a detector thread.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One bounded chat completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub timeout: Duration,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Synchronous model client. Implementations must honor `request.timeout`.
pub trait LlmClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

// -- OpenAI-compatible wire types --

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

/// Chat-completions client over any OpenAI-compatible endpoint.
pub struct HttpLlmClient {
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.model, "llm call");

        // One client per call: the blocking pool is not on the hot path, and
        // per-request timeouts stay independent.
        let http = reqwest::blocking::Client::builder()
            .timeout(request.timeout)
            .build()?;

        let response = http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&WireRequest {
                model: &request.model,
                messages: &request.messages,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Upstream(format!(
                "provider returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: WireResponse = response
            .json()
            .map_err(|e| Error::Malformed(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Malformed("response has no choices".into()))?;
        Ok(choice.message.content)
    }
}

/// Pull a JSON object out of a model reply that may wrap it in markdown
/// fences or surrounding prose.
pub fn extract_json(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // ```json … ``` fence
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```")
            && let Ok(value) = serde_json::from_str(after[..end].trim())
        {
            return Ok(value);
        }
    }

    // First balanced top-level object
    if let Some(start) = trimmed.find('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, ch) in trimmed[start..].char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &trimmed[start..start + offset + 1];
                        if let Ok(value) = serde_json::from_str(candidate) {
                            return Ok(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    Err(Error::Malformed(format!(
        "no JSON object in model reply: {}",
        trimmed.chars().take(120).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_json() {
        let value = extract_json(r#"{"allow": true, "reason": "ok"}"#).unwrap();
        assert_eq!(value["allow"], serde_json::json!(true));
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "Here is my verdict:\n```json\n{\"allow\": false}\n```\nDone.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["allow"], serde_json::json!(false));
    }

    #[test]
    fn test_extract_embedded_object() {
        let raw = "I think {\"action\": \"pause\", \"why\": \"loop {detected}\"} fits.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["action"], serde_json::json!("pause"));
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(extract_json("no structure here").is_err());
    }
}
