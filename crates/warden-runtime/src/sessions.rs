use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use warden_store::Store;
use warden_types::{
    new_session_id, ActionType, Agent, Clock, Session, SessionStatus,
};

use crate::{Error, Result};

/// Cap on per-action-type timestamp rings (rate-limit windows never need
/// more than this many samples).
const TIMESTAMP_RING_CAP: usize = 512;

struct SessionEntry {
    session: Session,
    timestamps: HashMap<ActionType, VecDeque<DateTime<Utc>>>,
    dirty: bool,
}

/// In-memory index of active sessions. Durable state is a projection into
/// the store, written by the coalescing flusher and on `end`.
///
/// Locking: the outer map is read-locked for lookups; each entry has its own
/// mutex for mutation, so two sessions never contend.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionEntry>>>>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            clock,
        }
    }

    /// Return the session with the given ID, resuming it from the store or
    /// creating it (with a fresh ID when none is supplied). Auto-registers
    /// the agent on first sight.
    pub fn get_or_create(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        metadata: Value,
    ) -> Result<Session> {
        if let Some(id) = session_id
            && !id.is_empty()
        {
            if let Some(entry) = self.entry(id) {
                return Ok(entry.lock().session.clone());
            }
            // Known to the store but not in memory: resume it.
            if let Some(session) = self.store.get_session(id)? {
                let snapshot = session.clone();
                self.insert_entry(session);
                return Ok(snapshot);
            }
        }

        let now = self.clock.now();
        self.register_agent(agent_id, now)?;

        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_session_id(),
        };
        let mut session = Session::new(id, agent_id.to_string(), now);
        session.metadata = metadata;
        self.store.upsert_session(&session)?;
        debug!(session = %session.id, agent = agent_id, "session created");

        let snapshot = session.clone();
        self.insert_entry(session);
        Ok(snapshot)
    }

    fn register_agent(&self, agent_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.store.register_agent(&Agent {
            id: agent_id.to_string(),
            name: agent_id.to_string(),
            created_at: now,
            current_version: 0,
            config: Value::Null,
            metadata: Value::Null,
        })?;
        Ok(())
    }

    fn entry(&self, session_id: &str) -> Option<Arc<Mutex<SessionEntry>>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn insert_entry(&self, session: Session) {
        let entry = SessionEntry {
            session,
            timestamps: HashMap::new(),
            dirty: false,
        };
        let mut sessions = self.sessions.write();
        sessions
            .entry(entry.session.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(entry)));
    }

    fn require(&self, session_id: &str) -> Result<Arc<Mutex<SessionEntry>>> {
        self.entry(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    /// Atomically add to `total_cost`. Persisted by the flusher.
    pub fn add_cost(&self, session_id: &str, delta: f64) -> Result<f64> {
        let entry = self.require(session_id)?;
        let mut entry = entry.lock();
        entry.session.total_cost += delta;
        entry.dirty = true;
        Ok(entry.session.total_cost)
    }

    /// Increment `action_count` and record a timestamp for rate windows.
    pub fn increment_actions(&self, session_id: &str, action_type: ActionType) -> Result<u64> {
        let entry = self.require(session_id)?;
        let mut entry = entry.lock();
        entry.session.action_count += 1;
        entry.dirty = true;

        let ring = entry.timestamps.entry(action_type).or_default();
        ring.push_back(self.clock.now());
        while ring.len() > TIMESTAMP_RING_CAP {
            ring.pop_front();
        }
        Ok(entry.session.action_count)
    }

    /// Recent timestamps for one action type, oldest first.
    pub fn recent_timestamps(
        &self,
        session_id: &str,
        action_type: ActionType,
    ) -> Vec<DateTime<Utc>> {
        match self.entry(session_id) {
            Some(entry) => entry
                .lock()
                .timestamps
                .get(&action_type)
                .map(|ring| ring.iter().copied().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        if let Some(entry) = self.entry(session_id) {
            return Ok(entry.lock().session.clone());
        }
        self.store
            .get_session(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    pub fn pause(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, SessionStatus::Paused)
    }

    pub fn resume(&self, session_id: &str) -> Result<()> {
        self.transition(session_id, SessionStatus::Active)
    }

    /// Mark terminated (kill-switch / detector action). Persists immediately
    /// and detaches the in-memory entry.
    pub fn terminate(&self, session_id: &str) -> Result<Session> {
        self.finish(session_id, SessionStatus::Terminated)
    }

    /// Mark completed. Persists immediately and detaches in-memory state.
    pub fn end(&self, session_id: &str) -> Result<Session> {
        self.finish(session_id, SessionStatus::Completed)
    }

    fn transition(&self, session_id: &str, next: SessionStatus) -> Result<()> {
        let entry = self.require(session_id)?;
        let mut entry = entry.lock();
        let current = entry.session.status;
        if !current.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "illegal session transition {} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }
        entry.session.status = next;
        entry.dirty = true;
        Ok(())
    }

    fn finish(&self, session_id: &str, status: SessionStatus) -> Result<Session> {
        let entry = self.require(session_id)?;
        let snapshot = {
            let mut entry = entry.lock();
            let current = entry.session.status;
            if !current.can_transition_to(status) {
                return Err(Error::Validation(format!(
                    "illegal session transition {} -> {}",
                    current.as_str(),
                    status.as_str()
                )));
            }
            entry.session.status = status;
            entry.session.ended_at = Some(self.clock.now());
            entry.dirty = false;
            entry.session.clone()
        };
        self.store.upsert_session(&snapshot)?;
        self.sessions.write().remove(session_id);
        Ok(snapshot)
    }

    /// Persist every dirty session. Called by the background flusher.
    pub fn flush_dirty(&self) -> usize {
        let entries: Vec<Arc<Mutex<SessionEntry>>> =
            self.sessions.read().values().cloned().collect();

        let mut flushed = 0;
        for entry in entries {
            let snapshot = {
                let mut entry = entry.lock();
                if !entry.dirty {
                    continue;
                }
                entry.dirty = false;
                entry.session.clone()
            };
            if let Err(err) = self.store.upsert_session(&snapshot) {
                warn!(session = %snapshot.id, error = %err, "session flush failed");
            } else {
                flushed += 1;
            }
        }
        flushed
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{ManualClock, SystemClock};

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn test_create_resume_and_reuse() {
        let m = manager();
        let created = m.get_or_create("agent-1", None, Value::Null).unwrap();
        assert!(created.id.starts_with("ses_"));

        let same = m
            .get_or_create("agent-1", Some(&created.id), Value::Null)
            .unwrap();
        assert_eq!(same.id, created.id);

        let named = m
            .get_or_create("agent-1", Some("ses_fixed"), Value::Null)
            .unwrap();
        assert_eq!(named.id, "ses_fixed");
    }

    #[test]
    fn test_agent_auto_registered() {
        let m = manager();
        m.get_or_create("fresh-agent", None, Value::Null).unwrap();
        let agent = m.store.get_agent("fresh-agent").unwrap().unwrap();
        assert_eq!(agent.name, "fresh-agent");
    }

    #[test]
    fn test_cost_and_count_accumulate() {
        let m = manager();
        let session = m.get_or_create("agent-1", None, Value::Null).unwrap();

        m.add_cost(&session.id, 0.25).unwrap();
        let total = m.add_cost(&session.id, 0.50).unwrap();
        assert_eq!(total, 0.75);

        m.increment_actions(&session.id, ActionType::ToolCall).unwrap();
        let count = m
            .increment_actions(&session.id, ActionType::ToolCall)
            .unwrap();
        assert_eq!(count, 2);

        let timestamps = m.recent_timestamps(&session.id, ActionType::ToolCall);
        assert_eq!(timestamps.len(), 2);
        assert!(m.recent_timestamps(&session.id, ActionType::LlmChat).is_empty());
    }

    #[test]
    fn test_pause_resume_end_lifecycle() {
        let m = manager();
        let session = m.get_or_create("agent-1", None, Value::Null).unwrap();

        m.pause(&session.id).unwrap();
        assert_eq!(m.get(&session.id).unwrap().status, SessionStatus::Paused);

        m.resume(&session.id).unwrap();
        let ended = m.end(&session.id).unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.ended_at.is_some());

        // Detached from memory but persisted.
        assert_eq!(m.active_count(), 0);
        let stored = m.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[test]
    fn test_end_twice_fails() {
        let m = manager();
        let session = m.get_or_create("agent-1", None, Value::Null).unwrap();
        m.end(&session.id).unwrap();
        assert!(matches!(m.end(&session.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_flush_persists_dirty_state() {
        let m = manager();
        let session = m.get_or_create("agent-1", None, Value::Null).unwrap();
        m.add_cost(&session.id, 1.5).unwrap();

        // Store still shows the creation snapshot.
        let before = m.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(before.total_cost, 0.0);

        assert_eq!(m.flush_dirty(), 1);
        let after = m.store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(after.total_cost, 1.5);

        // Nothing dirty on the second pass.
        assert_eq!(m.flush_dirty(), 0);
    }

    #[test]
    fn test_timestamp_ring_bounded() {
        let clock = ManualClock::new(Utc::now());
        let m = SessionManager::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(clock.clone()),
        );
        let session = m.get_or_create("agent-1", None, Value::Null).unwrap();
        for _ in 0..(TIMESTAMP_RING_CAP + 50) {
            clock.advance(chrono::Duration::milliseconds(1));
            m.increment_actions(&session.id, ActionType::ToolCall).unwrap();
        }
        let timestamps = m.recent_timestamps(&session.id, ActionType::ToolCall);
        assert_eq!(timestamps.len(), TIMESTAMP_RING_CAP);
    }
}
