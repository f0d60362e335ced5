//! Fixtures for AgentWarden tests: canned traces and sessions, plus a
//! temp-dir world wiring a real store to a disposable data directory.

mod fixtures;
mod world;

pub use fixtures::{append_trace, make_session, make_trace, TraceFixture};
pub use world::TestWorld;
