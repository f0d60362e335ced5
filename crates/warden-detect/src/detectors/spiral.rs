use serde_json::json;
use std::collections::{HashMap, VecDeque};

use super::{Detection, Detector};
use crate::config::SpiralConfig;
use crate::events::{ActionEvent, DetectorAction};

/// Detects output spirals: the last N LLM outputs all looking nearly the
/// same. Texts are compared as bag-of-word-count vectors via cosine
/// similarity; every consecutive pair must exceed the threshold to fire.
pub struct SpiralDetector {
    config: SpiralConfig,
    sessions: HashMap<String, VecDeque<String>>,
}

impl SpiralDetector {
    pub fn new(config: SpiralConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }
}

impl Detector for SpiralDetector {
    fn name(&self) -> &'static str {
        "spiral"
    }

    fn observe(&mut self, event: &ActionEvent) -> anyhow::Result<Option<Detection>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let Some(output) = &event.output else {
            return Ok(None);
        };
        if output.trim().is_empty() {
            return Ok(None);
        }

        let outputs = self.sessions.entry(event.session_id.clone()).or_default();
        outputs.push_back(output.clone());
        while outputs.len() > self.config.n_outputs {
            outputs.pop_front();
        }
        if outputs.len() < self.config.n_outputs {
            return Ok(None);
        }

        let mut min_similarity = f64::MAX;
        for pair in outputs.iter().zip(outputs.iter().skip(1)) {
            let similarity = cosine_similarity(pair.0, pair.1);
            if similarity < min_similarity {
                min_similarity = similarity;
            }
        }

        if min_similarity > self.config.similarity_threshold {
            outputs.clear();
            return Ok(Some(Detection {
                message: format!(
                    "last {} outputs are {:.0}% similar (repeating itself)",
                    self.config.n_outputs,
                    min_similarity * 100.0
                ),
                details: json!({
                    "n_outputs": self.config.n_outputs,
                    "min_similarity": min_similarity,
                    "threshold": self.config.similarity_threshold,
                }),
                action: self.config.action,
            }));
        }

        Ok(None)
    }

    fn fallback_action(&self) -> DetectorAction {
        self.config.fallback_action
    }

    fn forget_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

/// Cosine similarity of bag-of-word-count vectors. Case-insensitive,
/// whitespace tokens.
fn cosine_similarity(a: &str, b: &str) -> f64 {
    let counts_a = word_counts(a);
    let counts_b = word_counts(b);
    if counts_a.is_empty() || counts_b.is_empty() {
        return 0.0;
    }

    let dot: f64 = counts_a
        .iter()
        .filter_map(|(word, &count)| counts_b.get(word).map(|&other| count * other))
        .sum();
    let norm_a: f64 = counts_a.values().map(|c| c * c).sum::<f64>().sqrt();
    let norm_b: f64 = counts_b.values().map(|c| c * c).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn word_counts(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for word in text.split_whitespace() {
        *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::ActionType;

    fn event(output: Option<&str>) -> ActionEvent {
        ActionEvent {
            session_id: "ses_1".to_string(),
            agent_id: "agent-1".to_string(),
            action_type: ActionType::LlmChat,
            action_name: "chat".to_string(),
            model: None,
            cost_usd: 0.0,
            output: output.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_identical_and_disjoint() {
        assert!((cosine_similarity("a b c", "a b c") - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity("a b c", "x y z"), 0.0);
    }

    #[test]
    fn test_fires_on_repeating_outputs() {
        let mut d = SpiralDetector::new(SpiralConfig {
            n_outputs: 3,
            similarity_threshold: 0.9,
            ..Default::default()
        });

        assert!(d.observe(&event(Some("I will try again now"))).unwrap().is_none());
        assert!(d.observe(&event(Some("I will try again now"))).unwrap().is_none());
        let third = d.observe(&event(Some("I will try again now"))).unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn test_varied_outputs_are_silent() {
        let mut d = SpiralDetector::new(SpiralConfig {
            n_outputs: 3,
            similarity_threshold: 0.9,
            ..Default::default()
        });

        assert!(d.observe(&event(Some("reading the config file"))).unwrap().is_none());
        assert!(d.observe(&event(Some("running the test suite"))).unwrap().is_none());
        assert!(d
            .observe(&event(Some("deploying to staging env")))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_non_llm_actions_ignored() {
        let mut d = SpiralDetector::new(SpiralConfig {
            n_outputs: 2,
            similarity_threshold: 0.5,
            ..Default::default()
        });
        for _ in 0..5 {
            assert!(d.observe(&event(None)).unwrap().is_none());
        }
    }
}
