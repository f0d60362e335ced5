use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::{ChatRequest, Error, LlmClient, Result};

/// Scripted client for tests: replies are popped in order, then the default
/// is returned. `fail_next` injects an upstream failure.
pub struct MockLlm {
    replies: Mutex<VecDeque<Result<String>>>,
    default_reply: String,
    calls: Mutex<Vec<ChatRequest>>,
}

impl MockLlm {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .push_back(Err(Error::Upstream(message.into())));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.calls.lock().last().cloned()
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.calls.lock().push(request.clone());
        match self.replies.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(self.default_reply.clone()),
        }
    }
}
