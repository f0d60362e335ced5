use serde::Deserialize;

use crate::events::DetectorAction;

#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fires when one signature repeats more than this many times in window.
    #[serde(default = "default_loop_threshold")]
    pub threshold: usize,
    #[serde(default = "default_loop_window")]
    pub window_seconds: u64,
    #[serde(default = "default_pause")]
    pub action: DetectorAction,
    #[serde(default = "default_alert")]
    pub fallback_action: DetectorAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostAnomalyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Recent mean must exceed `multiplier` × baseline mean.
    #[serde(default = "default_cost_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_cost_window")]
    pub window_seconds: u64,
    #[serde(default = "default_alert")]
    pub action: DetectorAction,
    #[serde(default = "default_alert")]
    pub fallback_action: DetectorAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpiralConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of consecutive LLM outputs compared.
    #[serde(default = "default_spiral_outputs")]
    pub n_outputs: usize,
    #[serde(default = "default_spiral_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_alert")]
    pub action: DetectorAction,
    #[serde(default = "default_alert")]
    pub fallback_action: DetectorAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Actions per second that counts as a surge.
    #[serde(default = "default_velocity_threshold")]
    pub threshold_per_second: f64,
    #[serde(default = "default_velocity_sustained")]
    pub sustained_seconds: u64,
    #[serde(default = "default_pause")]
    pub action: DetectorAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Actions used to learn the per-agent baseline histogram.
    #[serde(default = "default_drift_baseline")]
    pub baseline_actions: usize,
    /// Rolling window compared against the baseline.
    #[serde(default = "default_drift_window")]
    pub window_actions: usize,
    #[serde(default = "default_drift_threshold")]
    pub kl_threshold: f64,
    #[serde(default = "default_alert")]
    pub action: DetectorAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default, rename = "loop")]
    pub loop_detection: LoopConfig,
    #[serde(default)]
    pub cost_anomaly: CostAnomalyConfig,
    #[serde(default)]
    pub spiral: SpiralConfig,
    #[serde(default)]
    pub velocity: VelocityConfig,
    #[serde(default)]
    pub drift: DriftConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_loop_threshold(),
            window_seconds: default_loop_window(),
            action: default_pause(),
            fallback_action: default_alert(),
        }
    }
}

impl Default for CostAnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: default_cost_multiplier(),
            window_seconds: default_cost_window(),
            action: default_alert(),
            fallback_action: default_alert(),
        }
    }
}

impl Default for SpiralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_outputs: default_spiral_outputs(),
            similarity_threshold: default_spiral_threshold(),
            action: default_alert(),
            fallback_action: default_alert(),
        }
    }
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_per_second: default_velocity_threshold(),
            sustained_seconds: default_velocity_sustained(),
            action: default_pause(),
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            baseline_actions: default_drift_baseline(),
            window_actions: default_drift_window(),
            kl_threshold: default_drift_threshold(),
            action: default_alert(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            loop_detection: LoopConfig::default(),
            cost_anomaly: CostAnomalyConfig::default(),
            spiral: SpiralConfig::default(),
            velocity: VelocityConfig::default(),
            drift: DriftConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_pause() -> DetectorAction {
    DetectorAction::Pause
}
fn default_alert() -> DetectorAction {
    DetectorAction::Alert
}
fn default_loop_threshold() -> usize {
    3
}
fn default_loop_window() -> u64 {
    60
}
fn default_cost_multiplier() -> f64 {
    3.0
}
fn default_cost_window() -> u64 {
    30
}
fn default_spiral_outputs() -> usize {
    4
}
fn default_spiral_threshold() -> f64 {
    0.92
}
fn default_velocity_threshold() -> f64 {
    5.0
}
fn default_velocity_sustained() -> u64 {
    5
}
fn default_drift_baseline() -> usize {
    50
}
fn default_drift_window() -> usize {
    30
}
fn default_drift_threshold() -> f64 {
    0.8
}
