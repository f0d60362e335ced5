// Internal modules (not exposed to external crates)
pub(crate) mod alerts;
pub(crate) mod approvals;
pub(crate) mod auth;
pub(crate) mod config;
pub(crate) mod cost;
pub(crate) mod error;
pub(crate) mod ingress;
pub(crate) mod sessions;
pub(crate) mod workers;

// Main facade (transport adapters and embedders build on this)
pub use ingress::{SessionSummary, TraceRequest, Warden};

// Data types used as inputs/outputs in public APIs
pub use alerts::{sign_payload, AlertDispatcher, SIGNATURE_HEADER};
pub use approvals::{ApprovalQueue, TimedOutApproval};
pub use auth::{ApiOperation, IssuedToken, Role, TokenStore};
pub use config::{
    resolve_data_dir, AlertConfig, AuthConfig, CostConfig, DataLayout, EvolutionRunnerConfig,
    LlmConfig, RetentionConfig, WardenConfig,
};
pub use cost::{estimate_tokens, CostTracker};
pub use error::{Error, Result};
pub use sessions::SessionManager;
pub use workers::{BoundedQueue, WorkerPool};
