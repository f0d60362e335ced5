mod analyze;
mod compare;
mod engine;
mod error;
mod monitor;
mod score;
mod shadow;
mod versions;

pub use analyze::{Analysis, FailurePattern, Priority};
pub use compare::{compare_composites, Recommendation};
pub use engine::{CycleOutcome, EvolveConfig, EvolutionEngine, Proposal, RiskLevel};
pub use error::{Error, Result};
pub use monitor::{RollbackDirection, RollbackTrigger};
pub use score::{ScoreWeights, SessionScore, VersionScore};
pub use shadow::{ShadowMetrics, ShadowOutcome, ShadowRegistry, ShadowSide, ShadowTest};
pub use versions::{parse_version_number, prompt_files, VersionEntry, VersionKind, VersionTree};
