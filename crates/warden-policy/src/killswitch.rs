use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

// NOTE: The kill switch lives entirely in process state, outside any LLM
// context window. A prompt-injected agent cannot talk its way past it: the
// check runs before policy rules and reads nothing the agent controls.

const HISTORY_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillScope {
    Global,
    Agent,
    Session,
}

impl KillScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillScope::Global => "global",
            KillScope::Agent => "agent",
            KillScope::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSource {
    Api,
    Cli,
    Dashboard,
    Chat,
    File,
}

impl KillSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSource::Api => "api",
            KillSource::Cli => "cli",
            KillSource::Dashboard => "dashboard",
            KillSource::Chat => "chat",
            KillSource::File => "file",
        }
    }
}

/// One trigger or reset, kept in the bounded in-memory history and handed to
/// the event sink for durable logging.
#[derive(Debug, Clone, Serialize)]
pub struct KillEvent {
    pub kind: &'static str, // "trigger" | "reset"
    pub scope: KillScope,
    pub target_id: Option<String>,
    pub reason: String,
    pub source: KillSource,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct ActiveKill {
    reason: String,
    source: KillSource,
    triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub global_triggered: bool,
    pub global_reason: Option<String>,
    pub agent_kills: HashMap<String, String>,
    pub session_kills: HashMap<String, String>,
    pub history_count: usize,
}

#[derive(Default)]
struct KillState {
    global: Option<ActiveKill>,
    agents: HashMap<String, ActiveKill>,
    sessions: HashMap<String, ActiveKill>,
    history: VecDeque<KillEvent>,
    history_total: usize,
}

type EventSink = Box<dyn Fn(&KillEvent) + Send + Sync>;

/// Hard out-of-band override, evaluated before every policy rule.
pub struct KillSwitch {
    state: RwLock<KillState>,
    sink: RwLock<Option<EventSink>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(KillState::default()),
            sink: RwLock::new(None),
        }
    }

    /// Wire the durable event log (store-backed). Replaces any prior sink.
    pub fn set_event_sink(&self, sink: EventSink) {
        *self.sink.write() = Some(sink);
    }

    pub fn trigger(
        &self,
        scope: KillScope,
        target_id: Option<&str>,
        reason: &str,
        source: KillSource,
    ) {
        let kill = ActiveKill {
            reason: reason.to_string(),
            source,
            triggered_at: Utc::now(),
        };

        {
            let mut state = self.state.write();
            match scope {
                KillScope::Global => state.global = Some(kill),
                KillScope::Agent => {
                    if let Some(id) = target_id {
                        state.agents.insert(id.to_string(), kill);
                    }
                }
                KillScope::Session => {
                    if let Some(id) = target_id {
                        state.sessions.insert(id.to_string(), kill);
                    }
                }
            }
        }

        warn!(scope = scope.as_str(), target = ?target_id, reason, "kill switch triggered");
        self.record(KillEvent {
            kind: "trigger",
            scope,
            target_id: target_id.map(str::to_string),
            reason: reason.to_string(),
            source,
            timestamp: Utc::now(),
        });
    }

    pub fn reset(&self, scope: KillScope, target_id: Option<&str>, source: KillSource) {
        {
            let mut state = self.state.write();
            match scope {
                KillScope::Global => state.global = None,
                KillScope::Agent => {
                    if let Some(id) = target_id {
                        state.agents.remove(id);
                    }
                }
                KillScope::Session => {
                    if let Some(id) = target_id {
                        state.sessions.remove(id);
                    }
                }
            }
        }

        self.record(KillEvent {
            kind: "reset",
            scope,
            target_id: target_id.map(str::to_string),
            reason: String::new(),
            source,
            timestamp: Utc::now(),
        });
    }

    /// Whether the given agent/session is currently blocked, and why.
    pub fn is_blocked(&self, agent_id: &str, session_id: &str) -> (bool, Option<String>) {
        let state = self.state.read();
        if let Some(kill) = &state.global {
            return (true, Some(format!("global kill: {}", kill.reason)));
        }
        if let Some(kill) = state.agents.get(agent_id) {
            return (true, Some(format!("agent kill: {}", kill.reason)));
        }
        if let Some(kill) = state.sessions.get(session_id) {
            return (true, Some(format!("session kill: {}", kill.reason)));
        }
        (false, None)
    }

    /// Whether the global kill is active and was triggered by the file
    /// sentinel (reset requires an API call, not sentinel removal).
    pub fn global_is_file_triggered(&self) -> bool {
        matches!(
            &self.state.read().global,
            Some(kill) if kill.source == KillSource::File
        )
    }

    pub fn status(&self) -> KillSwitchStatus {
        let state = self.state.read();
        KillSwitchStatus {
            global_triggered: state.global.is_some(),
            global_reason: state.global.as_ref().map(|k| k.reason.clone()),
            agent_kills: state
                .agents
                .iter()
                .map(|(id, kill)| (id.clone(), kill.reason.clone()))
                .collect(),
            session_kills: state
                .sessions
                .iter()
                .map(|(id, kill)| (id.clone(), kill.reason.clone()))
                .collect(),
            history_count: state.history_total,
        }
    }

    pub fn history(&self, limit: usize) -> Vec<KillEvent> {
        let state = self.state.read();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    fn record(&self, event: KillEvent) {
        {
            let mut state = self.state.write();
            if state.history.len() == HISTORY_CAP {
                state.history.pop_front();
            }
            state.history.push_back(event.clone());
            state.history_total += 1;
        }
        if let Some(sink) = &*self.sink.read() {
            sink(&event);
        }
    }
}
