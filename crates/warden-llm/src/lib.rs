mod client;
mod error;
mod mock;

pub use client::{ChatMessage, ChatRequest, HttpLlmClient, LlmClient, Role, extract_json};
pub use error::{Error, Result};
pub use mock::MockLlm;
