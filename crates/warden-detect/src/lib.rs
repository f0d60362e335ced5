mod config;
mod detectors;
mod engine;
mod events;
mod playbook;

pub use config::{
    CostAnomalyConfig, DetectionConfig, DriftConfig, LoopConfig, SpiralConfig, VelocityConfig,
};
pub use detectors::{
    CostAnomalyDetector, Detection, Detector, DriftDetector, LoopDetector, SpiralDetector,
    VelocityDetector,
};
pub use engine::DetectionEngine;
pub use events::{ActionEvent, DetectionEvent, DetectorAction};
pub use playbook::playbook_file_name;
