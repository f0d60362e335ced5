use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};

use super::{Detection, Detector};
use crate::config::LoopConfig;
use crate::events::{ActionEvent, DetectorAction};

/// Fires when one action signature repeats more than `threshold` times
/// inside the sliding window. State resets after a firing so a stuck agent
/// produces one event per episode, not one per action.
pub struct LoopDetector {
    config: LoopConfig,
    sessions: HashMap<String, VecDeque<(String, DateTime<Utc>)>>,
}

impl LoopDetector {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }
}

impl Detector for LoopDetector {
    fn name(&self) -> &'static str {
        "loop"
    }

    fn observe(&mut self, event: &ActionEvent) -> anyhow::Result<Option<Detection>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let window = Duration::seconds(self.config.window_seconds as i64);
        let signature = event.signature();
        let entries = self.sessions.entry(event.session_id.clone()).or_default();

        entries.push_back((signature.clone(), event.timestamp));
        while let Some((_, ts)) = entries.front() {
            if event.timestamp - *ts > window {
                entries.pop_front();
            } else {
                break;
            }
        }

        let repeats = entries.iter().filter(|(sig, _)| *sig == signature).count();
        if repeats > self.config.threshold {
            entries.clear();
            return Ok(Some(Detection {
                message: format!(
                    "action '{}' repeated {} times within {}s",
                    signature, repeats, self.config.window_seconds
                ),
                details: json!({
                    "signature": signature,
                    "repeats": repeats,
                    "threshold": self.config.threshold,
                    "window_seconds": self.config.window_seconds,
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
