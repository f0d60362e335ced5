use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;

use super::{Detection, Detector};
use crate::config::CostAnomalyConfig;
use crate::events::{ActionEvent, DetectorAction};

struct SessionCosts {
    points: Vec<(DateTime<Utc>, f64)>,
}

/// Compares the mean per-action cost of the recent window against the
/// baseline mean of everything before it. Needs at least 3 baseline points
/// and a non-zero baseline before it will fire.
pub struct CostAnomalyDetector {
    config: CostAnomalyConfig,
    sessions: HashMap<String, SessionCosts>,
}

const MIN_BASELINE_POINTS: usize = 3;

impl CostAnomalyDetector {
    pub fn new(config: CostAnomalyConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }
}

impl Detector for CostAnomalyDetector {
    fn name(&self) -> &'static str {
        "cost_anomaly"
    }

    fn observe(&mut self, event: &ActionEvent) -> anyhow::Result<Option<Detection>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let state = self
            .sessions
            .entry(event.session_id.clone())
            .or_insert_with(|| SessionCosts { points: Vec::new() });
        state.points.push((event.timestamp, event.cost_usd));

        let window_start = event.timestamp - Duration::seconds(self.config.window_seconds as i64);

        let (baseline, recent): (Vec<f64>, Vec<f64>) = state.points.iter().fold(
            (Vec::new(), Vec::new()),
            |(mut baseline, mut recent), (ts, cost)| {
                if *ts < window_start {
                    baseline.push(*cost);
                } else {
                    recent.push(*cost);
                }
                (baseline, recent)
            },
        );

        if baseline.len() < MIN_BASELINE_POINTS || recent.is_empty() {
            return Ok(None);
        }

        let baseline_mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;

        if baseline_mean > 0.0 && recent_mean > self.config.multiplier * baseline_mean {
            state.points.clear();
            return Ok(Some(Detection {
                message: format!(
                    "per-action cost jumped to ${:.4} ({}x baseline ${:.4})",
                    recent_mean,
                    (recent_mean / baseline_mean).round() as i64,
                    baseline_mean
                ),
                details: json!({
                    "baseline_mean": baseline_mean,
                    "recent_mean": recent_mean,
                    "multiplier": self.config.multiplier,
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

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ActionType;

    fn event(at: DateTime<Utc>, cost: f64) -> ActionEvent {
        ActionEvent {
            session_id: "ses_1".to_string(),
            agent_id: "agent-1".to_string(),
            action_type: ActionType::LlmChat,
            action_name: "chat".to_string(),
            model: Some("gpt-4o".to_string()),
            cost_usd: cost,
            output: None,
            timestamp: at,
        }
    }

    fn detector() -> CostAnomalyDetector {
        CostAnomalyDetector::new(CostAnomalyConfig {
            multiplier: 3.0,
            window_seconds: 30,
            ..Default::default()
        })
    }

    #[test]
    fn test_needs_three_baseline_points() {
        let mut d = detector();
        let start = Utc::now();

        // Two cheap baseline points, then an expensive recent one.
        d.observe(&event(start, 0.01)).unwrap();
        d.observe(&event(start + Duration::seconds(1), 0.01)).unwrap();
        let result = d.observe(&event(start + Duration::seconds(60), 1.0)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_fires_on_spike_over_baseline() {
        let mut d = detector();
        let start = Utc::now();

        for i in 0..4 {
            d.observe(&event(start + Duration::seconds(i), 0.01)).unwrap();
        }
        // 90s later: baseline window has drained, spike arrives.
        let spike = d
            .observe(&event(start + Duration::seconds(90), 0.50))
            .unwrap();
        let detection = spike.unwrap();
        assert!(detection.message.contains("baseline"));
        assert_eq!(detection.action, DetectorAction::Alert);
    }

    #[test]
    fn test_silent_when_costs_stay_flat() {
        let mut d = detector();
        let start = Utc::now();

        for i in 0..10 {
            let result = d
                .observe(&event(start + Duration::seconds(i * 20), 0.01))
                .unwrap();
            assert!(result.is_none());
        }
    }

    #[test]
    fn test_zero_baseline_never_fires() {
        let mut d = detector();
        let start = Utc::now();

        for i in 0..5 {
            d.observe(&event(start + Duration::seconds(i), 0.0)).unwrap();
        }
        let result = d.observe(&event(start + Duration::seconds(90), 1.0)).unwrap();
        assert!(result.is_none());
    }
}
