mod capability;
mod engine;
mod error;
pub mod expr;
mod invariants;
mod killswitch;
mod reload;
mod rules;
mod spawn;

pub use capability::{CapabilityConfig, CapabilityEngine};
pub use engine::{ApprovalDirective, Decision, FailMode, PolicyEngine};
pub use error::{Error, Result};
pub use invariants::{EnforcementMode, InvariantConfig, InvariantEngine, InvariantHit};
pub use killswitch::{KillEvent, KillScope, KillSource, KillSwitch, KillSwitchStatus};
pub use reload::{load_policy_dir, PolicyWatcher};
pub use rules::{CompiledRule, PolicyDocument, RuleConfig, RuleSet, RuleType};
pub use spawn::{SpawnConfig, SpawnGovernor};
