// Durable state lives here and only here: traces, sessions, agents,
// versions, approvals, violations, kill-switch history. Everything else in
// the workspace holds projections of this store in memory.

mod db;
mod error;
mod queries;
mod redaction;
mod schema;

pub use db::{Store, TraceFilter};
pub use error::{Error, Result};
pub use queries::session::SessionTraceStats;
pub use queries::kill::KillEventRecord;
pub use redaction::{RedactionRule, Redactor};
