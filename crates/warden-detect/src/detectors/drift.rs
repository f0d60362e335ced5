use serde_json::json;
use std::collections::{HashMap, VecDeque};

use warden_types::ActionType;

use super::{Detection, Detector};
use crate::config::DriftConfig;
use crate::events::ActionEvent;

struct AgentProfile {
    baseline_counts: HashMap<ActionType, usize>,
    baseline_total: usize,
    window: VecDeque<ActionType>,
}

/// Compares an agent's recent action-type mix against its learned baseline
/// using KL divergence. The baseline freezes after `baseline_actions`
/// observations; the rolling window is compared from then on.
pub struct DriftDetector {
    config: DriftConfig,
    agents: HashMap<String, AgentProfile>,
}

const SMOOTHING: f64 = 1e-4;

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            agents: HashMap::new(),
        }
    }
}

impl Detector for DriftDetector {
    fn name(&self) -> &'static str {
        "drift"
    }

    fn observe(&mut self, event: &ActionEvent) -> anyhow::Result<Option<Detection>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let profile = self
            .agents
            .entry(event.agent_id.clone())
            .or_insert_with(|| AgentProfile {
                baseline_counts: HashMap::new(),
                baseline_total: 0,
                window: VecDeque::new(),
            });

        // Learning phase: accumulate the baseline histogram.
        if profile.baseline_total < self.config.baseline_actions {
            *profile
                .baseline_counts
                .entry(event.action_type)
                .or_insert(0) += 1;
            profile.baseline_total += 1;
            return Ok(None);
        }

        profile.window.push_back(event.action_type);
        while profile.window.len() > self.config.window_actions {
            profile.window.pop_front();
        }
        if profile.window.len() < self.config.window_actions {
            return Ok(None);
        }

        let mut window_counts: HashMap<ActionType, usize> = HashMap::new();
        for action_type in &profile.window {
            *window_counts.entry(*action_type).or_insert(0) += 1;
        }

        let divergence = kl_divergence(
            &window_counts,
            profile.window.len(),
            &profile.baseline_counts,
            profile.baseline_total,
        );

        if divergence > self.config.kl_threshold {
            profile.window.clear();
            return Ok(Some(Detection {
                message: format!(
                    "action mix diverged from baseline (KL {:.2} > {:.2})",
                    divergence, self.config.kl_threshold
                ),
                details: json!({
                    "kl_divergence": divergence,
                    "threshold": self.config.kl_threshold,
                    "window_actions": self.config.window_actions,
                }),
                action: self.config.action,
            }));
        }

        Ok(None)
    }
}

/// KL(window ‖ baseline) over the closed action-type domain, smoothed so
/// unseen types never divide by zero.
fn kl_divergence(
    window: &HashMap<ActionType, usize>,
    window_total: usize,
    baseline: &HashMap<ActionType, usize>,
    baseline_total: usize,
) -> f64 {
    if window_total == 0 || baseline_total == 0 {
        return 0.0;
    }
    let domain = ActionType::ALL.len() as f64;
    let window_norm = window_total as f64 + SMOOTHING * domain;
    let baseline_norm = baseline_total as f64 + SMOOTHING * domain;

    ActionType::ALL
        .iter()
        .map(|action_type| {
            let p = (window.get(action_type).copied().unwrap_or(0) as f64 + SMOOTHING)
                / window_norm;
            let q = (baseline.get(action_type).copied().unwrap_or(0) as f64 + SMOOTHING)
                / baseline_norm;
            p * (p / q).ln()
        })
        .sum()
}
