use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};

use super::{Detection, Detector};
use crate::config::VelocityConfig;
use crate::events::ActionEvent;

/// Fires when a session sustains `threshold_per_second` actions/sec for at
/// least `sustained_seconds`.
pub struct VelocityDetector {
    config: VelocityConfig,
    sessions: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl VelocityDetector {
    pub fn new(config: VelocityConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }
}

impl Detector for VelocityDetector {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn observe(&mut self, event: &ActionEvent) -> anyhow::Result<Option<Detection>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let sustained = Duration::seconds(self.config.sustained_seconds as i64);
        let ring = self.sessions.entry(event.session_id.clone()).or_default();

        ring.push_back(event.timestamp);
        while let Some(front) = ring.front() {
            if event.timestamp - *front > sustained {
                ring.pop_front();
            } else {
                break;
            }
        }

        let span = match (ring.front(), ring.back()) {
            (Some(first), Some(last)) => *last - *first,
            _ => Duration::zero(),
        };
        if span < sustained {
            return Ok(None);
        }

        let rate = ring.len() as f64 / span.num_milliseconds().max(1) as f64 * 1000.0;
        if rate >= self.config.threshold_per_second {
            let count = ring.len();
            ring.clear();
            return Ok(Some(Detection {
                message: format!(
                    "{:.1} actions/sec sustained over {}s ({} actions)",
                    rate, self.config.sustained_seconds, count
                ),
                details: json!({
                    "rate_per_second": rate,
                    "sustained_seconds": self.config.sustained_seconds,
                    "threshold_per_second": self.config.threshold_per_second,
                }),
                action: self.config.action,
            }));
        }

        Ok(None)
    }

    fn forget_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ActionType;

    fn event(at: DateTime<Utc>) -> ActionEvent {
        ActionEvent {
            session_id: "ses_1".to_string(),
            agent_id: "agent-1".to_string(),
            action_type: ActionType::ToolCall,
            action_name: "poll".to_string(),
            model: None,
            cost_usd: 0.0,
            output: None,
            timestamp: at,
        }
    }

    #[test]
    fn test_sustained_surge_fires() {
        let mut d = VelocityDetector::new(VelocityConfig {
            threshold_per_second: 4.0,
            sustained_seconds: 5,
            ..Default::default()
        });

        let start = Utc::now();
        let mut fired = false;
        // 5 actions/sec for 6 seconds.
        for i in 0..30 {
            let at = start + Duration::milliseconds(i * 200);
            if d.observe(&event(at)).unwrap().is_some() {
                fired = true;
                break;
            }
        }
        assert!(fired);
    }

    #[test]
    fn test_short_burst_does_not_fire() {
        let mut d = VelocityDetector::new(VelocityConfig {
            threshold_per_second: 4.0,
            sustained_seconds: 5,
            ..Default::default()
        });

        let start = Utc::now();
        // 10 actions/sec but only for 2 seconds.
        for i in 0..20 {
            let at = start + Duration::milliseconds(i * 100);
            assert!(d.observe(&event(at)).unwrap().is_none());
        }
    }

    #[test]
    fn test_slow_steady_pace_does_not_fire() {
        let mut d = VelocityDetector::new(VelocityConfig {
            threshold_per_second: 4.0,
            sustained_seconds: 5,
            ..Default::default()
        });

        let start = Utc::now();
        for i in 0..30 {
            let at = start + Duration::seconds(i);
            assert!(d.observe(&event(at)).unwrap().is_none());
        }
    }
}
