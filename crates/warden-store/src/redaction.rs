use regex::Regex;
use serde::Deserialize;

use warden_types::Trace;

use crate::{Error, Result};

/// Field names a redaction rule may scope to.
const REDACTABLE_FIELDS: [&str; 4] = ["request_body", "response_body", "action_name", "metadata"];

/// One regex → replacement rule, scoped to named trace fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionRule {
    pub pattern: String,
    pub replacement: String,
    /// Fields this rule applies to; empty means both bodies.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Compiled redaction pass. Runs before a trace is sealed: the hash chain
/// covers the redacted bodies, so redaction cannot be reversed from storage.
pub struct Redactor {
    rules: Vec<CompiledRule>,
}

struct CompiledRule {
    regex: Regex,
    replacement: String,
    fields: Vec<String>,
}

impl Redactor {
    pub fn compile(rules: &[RedactionRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&rule.pattern)
                .map_err(|e| Error::Query(format!("bad redaction pattern '{}': {}", rule.pattern, e)))?;
            let fields = if rule.fields.is_empty() {
                vec!["request_body".to_string(), "response_body".to_string()]
            } else {
                for f in &rule.fields {
                    if !REDACTABLE_FIELDS.contains(&f.as_str()) {
                        return Err(Error::Query(format!("unknown redaction field: {}", f)));
                    }
                }
                rule.fields.clone()
            };
            compiled.push(CompiledRule {
                regex,
                replacement: rule.replacement.clone(),
                fields,
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, trace: &mut Trace) {
        for rule in &self.rules {
            for field in &rule.fields {
                match field.as_str() {
                    "request_body" => {
                        trace.request_body = rule
                            .regex
                            .replace_all(&trace.request_body, rule.replacement.as_str())
                            .into_owned();
                    }
                    "response_body" => {
                        trace.response_body = rule
                            .regex
                            .replace_all(&trace.response_body, rule.replacement.as_str())
                            .into_owned();
                    }
                    "action_name" => {
                        trace.action_name = rule
                            .regex
                            .replace_all(&trace.action_name, rule.replacement.as_str())
                            .into_owned();
                    }
                    "metadata" => {
                        if let Ok(raw) = serde_json::to_string(&trace.metadata) {
                            let redacted =
                                rule.regex.replace_all(&raw, rule.replacement.as_str());
                            if let Ok(value) = serde_json::from_str(&redacted) {
                                trace.metadata = value;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
