mod action;
mod agent;
mod alert;
mod approval;
mod chain;
mod clock;
mod error;
mod ids;
mod session;
mod trace;
mod verdict;

pub use action::{ActionContext, ActionRequest, ActionSpec, CallerContext, ActionType};
pub use agent::{Agent, AgentVersion, VersionStatus};
pub use alert::{AlertEvent, Severity};
pub use approval::{Approval, ApprovalStatus, Violation};
pub use chain::{compute_trace_hash, session_seed, truncate_body, MAX_BODY_BYTES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use ids::{new_approval_id, new_session_id, new_trace_id, new_violation_id};
pub use session::{Session, SessionStatus};
pub use trace::{Trace, TraceStatus};
pub use verdict::{EvalResponse, Verdict};
