use anyhow::Result;
use serde_json::Value;

use crate::events::{ActionEvent, DetectorAction};

mod cost;
mod drift;
mod loop_detector;
mod spiral;
mod velocity;

pub use cost::CostAnomalyDetector;
pub use drift::DriftDetector;
pub use loop_detector::LoopDetector;
pub use spiral::SpiralDetector;
pub use velocity::VelocityDetector;

/// A firing before playbook resolution. `action` may still be `Playbook`.
#[derive(Debug, Clone)]
pub struct Detection {
    pub message: String,
    pub details: Value,
    pub action: DetectorAction,
}

/// One streaming detector. Implementations own per-session state and use the
/// event's timestamp as their only time source, which keeps windows
/// deterministic under test.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn observe(&mut self, event: &ActionEvent) -> Result<Option<Detection>>;

    /// Action taken when this detector's playbook LLM call fails.
    fn fallback_action(&self) -> DetectorAction {
        DetectorAction::Alert
    }

    /// Drop per-session state when a session ends.
    fn forget_session(&mut self, _session_id: &str) {}
}
