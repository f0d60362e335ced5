use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use warden_detect::{ActionEvent, DetectionEngine, DetectorAction};
use warden_evolve::{CycleOutcome, EvolutionEngine, ShadowOutcome, ShadowSide, VersionTree};
use warden_llm::{HttpLlmClient, LlmClient};
use warden_policy::{
    load_policy_dir, KillScope, KillSource, KillSwitchStatus, PolicyEngine, PolicyWatcher,
};
use warden_store::{KillEventRecord, Redactor, Store, TraceFilter};
use warden_types::{
    new_trace_id, new_violation_id, ActionContext, ActionRequest, ActionType, AlertEvent,
    Approval, Clock, EvalResponse, Session, Severity, SystemClock, Trace, TraceStatus, Verdict,
    Violation,
};

use crate::alerts::AlertDispatcher;
use crate::approvals::ApprovalQueue;
use crate::auth::{ApiOperation, IssuedToken, Role, TokenStore};
use crate::config::{resolve_data_dir, DataLayout, WardenConfig};
use crate::cost::{estimate_tokens, CostTracker};
use crate::sessions::SessionManager;
use crate::workers::{BoundedQueue, WorkerPool};
use crate::{Error, Result};

const TRACE_QUEUE_CAP: usize = 4096;
const DETECT_QUEUE_CAP: usize = 4096;
const ALERT_QUEUE_CAP: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Fire-and-forget trace of an already-executed action.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceRequest {
    #[serde(flatten)]
    pub action: ActionRequest,
    #[serde(default)]
    pub request_body: String,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub tokens_in: Option<u64>,
    #[serde(default)]
    pub tokens_out: Option<u64>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub model: Option<String>,
    /// Post-hoc outcome. Advisory only: a `terminated` trace records the
    /// status but never transitions the session.
    #[serde(default)]
    pub status: Option<TraceStatus>,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: Session,
    pub duration_seconds: i64,
    pub violation_count: usize,
    pub total_actions: usize,
    pub total_cost: f64,
}

struct TraceJob {
    trace: Trace,
    violation: Option<Violation>,
}

/// The governance sidecar. One instance per process; all three logical
/// ingress endpoints (evaluate, trace, session lifecycle) plus the
/// management surface hang off this facade, transport-agnostically.
pub struct Warden {
    layout: DataLayout,
    config: WardenConfig,
    store: Arc<Store>,
    redactor: Arc<Redactor>,
    sessions: Arc<SessionManager>,
    cost: Arc<CostTracker>,
    engine: Arc<PolicyEngine>,
    detection: Arc<DetectionEngine>,
    approvals: Arc<ApprovalQueue>,
    alerts: Arc<AlertDispatcher>,
    auth: Arc<TokenStore>,
    evolution: Option<Arc<EvolutionEngine>>,
    clock: Arc<dyn Clock>,
    trace_queue: Arc<BoundedQueue<TraceJob>>,
    detect_queue: Arc<BoundedQueue<ActionEvent>>,
    alert_queue: Arc<BoundedQueue<AlertEvent>>,
    workers: WorkerPool,
    _policy_watcher: Option<PolicyWatcher>,
}

impl Warden {
    /// Open the sidecar against the resolved data directory, loading
    /// `config.toml` and the policies tree.
    pub fn start(data_dir: Option<&str>) -> Result<Self> {
        let layout = DataLayout::new(resolve_data_dir(data_dir)?);
        std::fs::create_dir_all(&layout.root)?;
        let config = WardenConfig::load_from(&layout.config_path())?;

        let llm: Option<Arc<dyn LlmClient>> = match std::env::var(&config.llm.api_key_env) {
            Ok(key) if !key.is_empty() => Some(Arc::new(HttpLlmClient::new(
                config.llm.base_url.clone(),
                key,
            ))),
            _ => None,
        };
        Self::start_with(layout, config, llm, Arc::new(SystemClock))
    }

    /// Full-control constructor: embedders and tests inject the model client
    /// and the clock.
    pub fn start_with(
        layout: DataLayout,
        config: WardenConfig,
        llm: Option<Arc<dyn LlmClient>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&layout.root)?;
        let store = Arc::new(Store::open(&layout.db_path())?);
        let redactor = Arc::new(Redactor::compile(&config.redactions)?);
        let cost = Arc::new(CostTracker::new(&config.cost));
        let sessions = Arc::new(SessionManager::new(store.clone(), clock.clone()));
        let approvals = Arc::new(ApprovalQueue::new(store.clone(), clock.clone()));
        let alerts = Arc::new(AlertDispatcher::new(config.alerts.clone()));
        let auth = Arc::new(TokenStore::new(
            config.auth.enabled,
            config.auth.token_ttl_seconds,
        ));

        // Policy engine: judge wiring, per-agent boundaries, kill logging.
        let mut engine = PolicyEngine::new(config.fail_mode).with_spawn_config(config.spawn.clone());
        if let Some(llm) = &llm {
            engine = engine.with_judge(
                llm.clone(),
                config.llm.judge_model.clone(),
                Duration::from_secs(config.llm.timeout_seconds),
            );
        }
        let engine = Arc::new(engine);
        for (agent_id, caps) in &config.capabilities {
            engine.capabilities().set_agent(agent_id, caps)?;
        }
        for (agent_id, invariants) in &config.invariants {
            engine.invariants().set_agent(agent_id, invariants)?;
        }
        {
            let store = store.clone();
            engine.kill_switch().set_event_sink(Box::new(move |event| {
                let record = KillEventRecord {
                    kind: event.kind.to_string(),
                    scope: event.scope.as_str().to_string(),
                    target_id: event.target_id.clone(),
                    reason: event.reason.clone(),
                    source: event.source.as_str().to_string(),
                    timestamp: event.timestamp,
                };
                if let Err(err) = store.insert_kill_event(&record) {
                    warn!(error = %err, "kill event not durably logged");
                }
            }));
        }

        let initial_rules = load_policy_dir(&layout.policies_dir())?;
        let rule_count = engine.reload(&initial_rules)?;
        info!(rules = rule_count, "policies loaded");
        let policy_watcher = match PolicyWatcher::start(layout.policies_dir(), engine.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %err, "policy watcher not started");
                None
            }
        };

        // Background queues.
        let trace_queue = Arc::new(BoundedQueue::new(TRACE_QUEUE_CAP));
        let detect_queue = Arc::new(BoundedQueue::new(DETECT_QUEUE_CAP));
        let alert_queue = Arc::new(BoundedQueue::new(ALERT_QUEUE_CAP));

        // Detection engine: events pause/terminate sessions and raise alerts.
        let detection = {
            let sessions = sessions.clone();
            let kill_switch = engine.kill_switch().clone();
            let alert_sink = alert_queue.clone();
            let mut detection = DetectionEngine::new(
                config.detection.clone(),
                Box::new(move |event| {
                    let mut alert = AlertEvent::new(
                        event.detector,
                        Severity::Warning,
                        format!("{} detector fired", event.detector),
                        event.message.clone(),
                    );
                    alert.agent_id = event.agent_id.clone();
                    alert.session_id = event.session_id.clone();
                    alert.details = event.details.clone();
                    alert_sink.push(alert);

                    match event.action {
                        DetectorAction::Pause => {
                            if let Err(err) = sessions.pause(&event.session_id) {
                                debug!(error = %err, "detector pause skipped");
                            }
                        }
                        DetectorAction::Terminate => {
                            kill_switch.trigger(
                                KillScope::Session,
                                Some(&event.session_id),
                                &format!("{}: {}", event.detector, event.message),
                                KillSource::Api,
                            );
                            if let Err(err) = sessions.terminate(&event.session_id) {
                                debug!(error = %err, "detector terminate skipped");
                            }
                        }
                        DetectorAction::Alert | DetectorAction::Playbook => {}
                    }
                }),
            );
            if let Some(llm) = &llm {
                detection = detection.with_playbooks(
                    layout.playbooks_dir(),
                    llm.clone(),
                    config.llm.playbook_model.clone(),
                    Duration::from_secs(config.llm.timeout_seconds),
                );
            }
            Arc::new(detection)
        };

        let evolution = match &llm {
            Some(llm) => Some(Arc::new(EvolutionEngine::new(
                store.clone(),
                llm.clone(),
                VersionTree::new(layout.agents_dir()),
                config.evolution.engine.clone(),
            )?)),
            None => None,
        };

        let warden = Self {
            layout,
            config,
            store,
            redactor,
            sessions,
            cost,
            engine,
            detection,
            approvals,
            alerts,
            auth,
            evolution,
            clock,
            trace_queue,
            detect_queue,
            alert_queue,
            workers: WorkerPool::new(),
            _policy_watcher: policy_watcher,
        };
        warden.spawn_workers()?;
        Ok(warden)
    }

    fn spawn_workers(&self) -> Result<()> {
        // Trace writer: redact → seal → insert, violations alongside.
        {
            let store = self.store.clone();
            let redactor = self.redactor.clone();
            self.workers.spawn_queue_worker(
                "trace-writer",
                self.trace_queue.clone(),
                move |mut job: TraceJob| {
                    redactor.apply(&mut job.trace);
                    let head = match store.chain_head(&job.trace.session_id) {
                        Ok(head) => head,
                        Err(err) => {
                            warn!(error = %err, "chain head lookup failed, trace dropped");
                            return;
                        }
                    };
                    job.trace.seal(head);
                    if let Err(err) = store.insert_trace(&job.trace) {
                        // Integrity failures stall only this session's chain.
                        warn!(trace = %job.trace.id, error = %err, "trace insert failed");
                        return;
                    }
                    if let Some(violation) = &job.violation {
                        if let Err(err) = store.insert_violation(violation) {
                            warn!(error = %err, "violation insert failed");
                        }
                    }
                },
            )?;
        }

        // Detection feed.
        {
            let detection = self.detection.clone();
            self.workers.spawn_queue_worker(
                "detection-feed",
                self.detect_queue.clone(),
                move |event: ActionEvent| {
                    detection.observe(&event);
                },
            )?;
        }

        // Alert sender.
        {
            let alerts = self.alerts.clone();
            self.workers.spawn_queue_worker(
                "alert-sender",
                self.alert_queue.clone(),
                move |alert: AlertEvent| {
                    alerts.dispatch(&alert);
                },
            )?;
        }

        // Session flusher: coalesced persistence of hot counters.
        {
            let sessions = self.sessions.clone();
            self.workers.spawn_periodic(
                "session-flusher",
                Duration::from_millis(250),
                move || {
                    sessions.flush_dirty();
                },
            )?;
        }

        // Approval sweeper: applies timeout effects.
        {
            let approvals = self.approvals.clone();
            let sessions = self.sessions.clone();
            let alert_sink = self.alert_queue.clone();
            self.workers
                .spawn_periodic("approval-sweeper", Duration::from_secs(5), move || {
                    match approvals.sweep_once() {
                        Ok(timed_out) => {
                            for item in timed_out {
                                let mut alert = AlertEvent::new(
                                    "approval_timeout",
                                    Severity::Warning,
                                    "Approval timed out",
                                    format!(
                                        "approval {} expired, applying {}",
                                        item.approval.id, item.effect
                                    ),
                                );
                                alert.session_id = item.approval.session_id.clone();
                                alert_sink.push(alert);
                                if item.effect == Verdict::Terminate {
                                    let _ = sessions.terminate(&item.approval.session_id);
                                }
                            }
                        }
                        Err(err) => warn!(error = %err, "approval sweep failed"),
                    }
                })?;
        }

        // Kill sentinel: file presence at <data>/KILL triggers a global
        // kill. Removal does not reset it; only the API does.
        {
            let sentinel = self.layout.kill_sentinel();
            let kill_switch = self.engine.kill_switch().clone();
            self.workers
                .spawn_periodic("kill-sentinel", Duration::from_secs(1), move || {
                    if sentinel.exists() && !kill_switch.status().global_triggered {
                        kill_switch.trigger(
                            KillScope::Global,
                            None,
                            "kill sentinel present",
                            KillSource::File,
                        );
                    }
                })?;
        }

        // Token cleanup.
        {
            let auth = self.auth.clone();
            self.workers
                .spawn_periodic("token-cleanup", Duration::from_secs(60), move || {
                    auth.cleanup_expired();
                })?;
        }

        // Retention pruning.
        {
            let store = self.store.clone();
            let days = self.config.retention.trace_days;
            self.workers
                .spawn_periodic("retention", Duration::from_secs(3600), move || {
                    if let Err(err) = store.prune_older_than(chrono::Duration::days(days as i64))
                    {
                        warn!(error = %err, "retention prune failed");
                    }
                })?;
        }

        // Evolution loop (opt-in).
        if self.config.evolution.enabled
            && let Some(evolution) = &self.evolution
        {
            let evolution = evolution.clone();
            let alert_sink = self.alert_queue.clone();
            let interval = Duration::from_secs(self.config.evolution.interval_minutes * 60);
            self.workers
                .spawn_periodic("evolution", interval, move || {
                    let agents = match evolution.tree().agent_ids() {
                        Ok(agents) => agents,
                        Err(err) => {
                            warn!(error = %err, "evolution agent scan failed");
                            return;
                        }
                    };
                    for agent_id in agents {
                        match evolution.run_cycle(&agent_id) {
                            Ok(outcome) => debug!(agent = %agent_id, ?outcome, "evolution cycle"),
                            Err(err) => warn!(agent = %agent_id, error = %err, "evolution cycle failed"),
                        }
                        match evolution.check_rollback(&agent_id) {
                            Ok(Some((rolled_back, restored))) => {
                                let mut alert = AlertEvent::new(
                                    "rollback",
                                    Severity::Critical,
                                    "Version auto-rollback",
                                    format!(
                                        "v{} rolled back, v{} active again",
                                        rolled_back, restored
                                    ),
                                );
                                alert.agent_id = agent_id.clone();
                                alert_sink.push(alert);
                            }
                            Ok(None) => {}
                            Err(err) => warn!(agent = %agent_id, error = %err, "rollback check failed"),
                        }
                    }
                })?;
        }

        Ok(())
    }

    // ---- Synchronous evaluation ----

    /// Evaluate one intended action. The verdict is computed synchronously;
    /// trace recording, detection and alerting happen on background workers
    /// after this returns.
    pub fn evaluate(&self, request: &ActionRequest) -> Result<EvalResponse> {
        let started = Instant::now();
        validate_request(request)?;
        let params = parse_params(&request.action.params)?;

        let session = self.sessions.get_or_create(
            &request.agent_id,
            Some(request.session_id.as_str()),
            serde_json::Value::Null,
        )?;

        // Sessions in a non-runnable state short-circuit before any rule.
        if session.status == warden_types::SessionStatus::Paused {
            return self.finish_evaluation(
                request,
                &session,
                warden_policy::Decision {
                    verdict: Verdict::Deny,
                    policy_name: Some("session_state".to_string()),
                    message: "session is paused".to_string(),
                    delay_seconds: None,
                    approval: None,
                },
                started,
            );
        }
        if session.status.is_terminal() {
            return self.finish_evaluation(
                request,
                &session,
                warden_policy::Decision {
                    verdict: Verdict::Terminate,
                    policy_name: Some("session_state".to_string()),
                    message: format!("session is {}", session.status.as_str()),
                    delay_seconds: None,
                    approval: None,
                },
                started,
            );
        }

        self.sessions
            .increment_actions(&session.id, request.action.action_type)?;

        let now = self.clock.now();
        let caller = request.context.clone().unwrap_or_default();
        let ctx = ActionContext {
            action_type: request.action.action_type,
            action_name: request.action.name.clone(),
            action_target: request.action.target.clone(),
            params,
            session_id: session.id.clone(),
            agent_id: request.agent_id.clone(),
            session_cost: caller.session_cost.unwrap_or(session.total_cost),
            session_action_count: caller
                .session_action_count
                .unwrap_or(session.action_count + 1),
            agent_name: request.agent_id.clone(),
            agent_daily_cost: self.cost.daily_cost(&request.agent_id, now),
            action_timestamps: self
                .sessions
                .recent_timestamps(&session.id, request.action.action_type),
            now,
        };

        let decision = self.engine.evaluate(&ctx);

        // Spawn bookkeeping: an allowed agent.spawn registers the child.
        if decision.verdict == Verdict::Allow
            && request.action.action_type == ActionType::AgentSpawn
            && let Some(child_id) = ctx.params.get("child_agent_id").and_then(|v| v.as_str())
        {
            self.engine
                .spawn_governor()
                .record_spawn(&request.agent_id, child_id);
        }

        self.finish_evaluation(request, &session, decision, started)
    }

    fn finish_evaluation(
        &self,
        request: &ActionRequest,
        session: &Session,
        decision: warden_policy::Decision,
        started: Instant,
    ) -> Result<EvalResponse> {
        let trace_id = new_trace_id();
        let now = self.clock.now();
        let action_summary = format!(
            "{} {}",
            request.action.action_type.as_str(),
            request.action.name
        );

        // Approval parking happens synchronously so the caller leaves with
        // an approval_id to poll.
        let mut approval_id = None;
        let mut timeout_seconds = None;
        if let Some(directive) = &decision.approval {
            let (approval, alert): (Approval, AlertEvent) = self.approvals.park(
                &session.id,
                &trace_id,
                &directive.policy_name,
                &action_summary,
                &directive.approvers,
                directive.timeout_minutes,
                directive.timeout_effect,
            )?;
            timeout_seconds = Some(directive.timeout_minutes * 60);
            approval_id = Some(approval.id);
            self.alert_queue.push(alert);
        }

        let violation = match decision.verdict {
            Verdict::Deny | Verdict::Terminate => Some(Violation {
                id: new_violation_id(),
                trace_id: trace_id.clone(),
                session_id: session.id.clone(),
                agent_id: request.agent_id.clone(),
                policy_name: decision
                    .policy_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                effect: decision.verdict,
                timestamp: now,
                action_summary: action_summary.clone(),
            }),
            _ => None,
        };

        if decision.verdict == Verdict::Terminate {
            if let Err(err) = self.sessions.terminate(&session.id) {
                debug!(error = %err, "terminate transition skipped");
            }
            // Cascade: a terminated parent takes its descendants with it.
            let governor = self.engine.spawn_governor();
            if governor.cascade_kill_enabled() {
                for child in governor.descendants(&request.agent_id) {
                    self.engine.kill_switch().trigger(
                        KillScope::Agent,
                        Some(&child),
                        &format!("cascade kill from parent '{}'", request.agent_id),
                        KillSource::Api,
                    );
                }
            }
        }

        if violation.is_some() {
            let mut alert = AlertEvent::new(
                "policy_violation",
                Severity::Critical,
                format!("Action {}", decision.verdict),
                format!(
                    "{} blocked by policy '{}': {}",
                    action_summary,
                    decision.policy_name.as_deref().unwrap_or("unknown"),
                    decision.message
                ),
            );
            alert.agent_id = request.agent_id.clone();
            alert.session_id = session.id.clone();
            self.alert_queue.push(alert);
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let trace = Trace {
            id: trace_id.clone(),
            session_id: session.id.clone(),
            agent_id: request.agent_id.clone(),
            timestamp: now,
            action_type: request.action.action_type,
            action_name: request.action.name.clone(),
            request_body: request.action.params.clone(),
            response_body: String::new(),
            status: decision.verdict.trace_status(),
            policy_name: decision.policy_name.clone(),
            policy_reason: if decision.message.is_empty() {
                None
            } else {
                Some(decision.message.clone())
            },
            latency_ms,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            model: None,
            metadata: metadata_json(&request.metadata),
            prev_hash: String::new(),
            hash: String::new(),
        };
        self.trace_queue.push(TraceJob { trace, violation });

        self.detect_queue.push(ActionEvent {
            session_id: session.id.clone(),
            agent_id: request.agent_id.clone(),
            action_type: request.action.action_type,
            action_name: request.action.name.clone(),
            model: None,
            cost_usd: 0.0,
            output: None,
            timestamp: now,
        });

        Ok(EvalResponse {
            verdict: decision.verdict,
            trace_id,
            policy_name: decision.policy_name,
            message: decision.message,
            approval_id,
            timeout_seconds,
            delay_seconds: decision.delay_seconds,
            latency_ms,
        })
    }

    // ---- Fire-and-forget tracing ----

    /// Record an already-executed action. No policy evaluation; cost and
    /// detection still apply. Returns the trace ID.
    pub fn record_trace(&self, request: &TraceRequest) -> Result<String> {
        let base = &request.action;
        let spec = &base.action;
        validate_request(base)?;

        let session = self.sessions.get_or_create(
            &base.agent_id,
            Some(base.session_id.as_str()),
            serde_json::Value::Null,
        )?;

        let tokens_in = request
            .tokens_in
            .unwrap_or_else(|| estimate_tokens(request.request_body.len()));
        let tokens_out = request
            .tokens_out
            .unwrap_or_else(|| estimate_tokens(request.response_body.len()));
        let cost_usd = self
            .cost
            .cost(request.model.as_deref(), tokens_in, tokens_out);

        let now = self.clock.now();
        self.sessions.add_cost(&session.id, cost_usd)?;
        self.sessions
            .increment_actions(&session.id, spec.action_type)?;
        self.cost.add_daily(&base.agent_id, cost_usd, now);

        let trace_id = new_trace_id();
        let trace = Trace {
            id: trace_id.clone(),
            session_id: session.id.clone(),
            agent_id: base.agent_id.clone(),
            timestamp: now,
            action_type: spec.action_type,
            action_name: spec.name.clone(),
            request_body: request.request_body.clone(),
            response_body: request.response_body.clone(),
            status: request.status.unwrap_or(TraceStatus::Allowed),
            policy_name: None,
            policy_reason: None,
            latency_ms: request.latency_ms,
            tokens_in,
            tokens_out,
            cost_usd,
            model: request.model.clone(),
            metadata: metadata_json(&base.metadata),
            prev_hash: String::new(),
            hash: String::new(),
        };
        self.trace_queue.push(TraceJob {
            trace,
            violation: None,
        });

        let output = if spec.action_type == ActionType::LlmChat
            && !request.response_body.is_empty()
        {
            Some(request.response_body.clone())
        } else {
            None
        };
        self.detect_queue.push(ActionEvent {
            session_id: session.id,
            agent_id: base.agent_id.clone(),
            action_type: spec.action_type,
            action_name: spec.name.clone(),
            model: request.model.clone(),
            cost_usd,
            output,
            timestamp: now,
        });

        Ok(trace_id)
    }

    // ---- Session lifecycle ----

    pub fn start_session(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<Session> {
        if agent_id.is_empty() {
            return Err(Error::Validation("agent_id is required".into()));
        }
        self.sessions.get_or_create(agent_id, session_id, metadata)
    }

    pub fn end_session(&self, session_id: &str) -> Result<SessionSummary> {
        let session = self.sessions.end(session_id)?;
        self.detection.forget_session(session_id);

        let stats = self.store.session_trace_stats(session_id)?;
        let violation_count = self.store.count_session_violations(session_id)?;
        let duration_seconds = session
            .ended_at
            .map(|end| (end - session.started_at).num_seconds())
            .unwrap_or(0);
        Ok(SessionSummary {
            total_actions: session.action_count as usize,
            total_cost: session.total_cost,
            duration_seconds,
            violation_count,
            session,
        })
    }

    pub fn pause_session(&self, session_id: &str) -> Result<()> {
        self.sessions.pause(session_id)
    }

    pub fn resume_session(&self, session_id: &str) -> Result<()> {
        self.sessions.resume(session_id)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.sessions.get(session_id)
    }

    pub fn score_session(&self, session_id: &str, score: serde_json::Value) -> Result<()> {
        if !self.store.score_session(session_id, &score)? {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    // ---- Approvals ----

    pub fn list_pending_approvals(&self) -> Result<Vec<Approval>> {
        self.approvals.list_pending()
    }

    pub fn get_approval(&self, id: &str) -> Result<Approval> {
        self.approvals.get(id)
    }

    pub fn approve(&self, id: &str, actor: &str) -> Result<Approval> {
        self.approvals.approve(id, actor)
    }

    pub fn deny_approval(&self, id: &str, actor: &str) -> Result<Approval> {
        self.approvals.deny(id, actor)
    }

    // ---- Kill switch ----

    pub fn kill(
        &self,
        scope: KillScope,
        target_id: Option<&str>,
        reason: &str,
        source: KillSource,
    ) {
        self.engine.kill_switch().trigger(scope, target_id, reason, source);
        let mut alert = AlertEvent::new(
            "kill_switch",
            Severity::Critical,
            "Kill switch triggered",
            reason.to_string(),
        );
        if scope == KillScope::Agent {
            alert.agent_id = target_id.unwrap_or_default().to_string();
        }
        if scope == KillScope::Session {
            alert.session_id = target_id.unwrap_or_default().to_string();
        }
        self.alert_queue.push(alert);
    }

    pub fn kill_reset(&self, scope: KillScope, target_id: Option<&str>, source: KillSource) {
        self.engine.kill_switch().reset(scope, target_id, source);
    }

    pub fn kill_status(&self) -> KillSwitchStatus {
        self.engine.kill_switch().status()
    }

    // ---- Policies ----

    /// Explicit reload. Compile errors leave the running set untouched.
    pub fn reload_policies(&self) -> Result<usize> {
        let rules = load_policy_dir(&self.layout.policies_dir())?;
        Ok(self.engine.reload(&rules)?)
    }

    /// Advisory lines for inject-mode safety invariants; the SDK appends
    /// them to the agent's system prompt.
    pub fn invariant_prompt_lines(&self, agent_id: &str) -> Vec<String> {
        self.engine.invariants().inject_lines(agent_id)
    }

    // ---- Traces ----

    pub fn get_trace(&self, id: &str) -> Result<Trace> {
        self.store
            .get_trace(id)?
            .ok_or_else(|| Error::NotFound(format!("trace {}", id)))
    }

    pub fn list_traces(&self, filter: &TraceFilter) -> Result<Vec<Trace>> {
        Ok(self.store.list_traces(filter)?)
    }

    pub fn search_traces(&self, query: &str, limit: usize) -> Result<Vec<Trace>> {
        Ok(self.store.search_traces(query, limit)?)
    }

    pub fn verify_chain(&self, session_id: &str) -> Result<(bool, Option<usize>)> {
        Ok(self.store.verify_chain(session_id)?)
    }

    // ---- Evolution ----

    pub fn run_evolution_cycle(&self, agent_id: &str) -> Result<CycleOutcome> {
        let evolution = self.require_evolution()?;
        Ok(evolution.run_cycle(agent_id)?)
    }

    pub fn check_rollback(&self, agent_id: &str) -> Result<Option<(u32, u32)>> {
        let evolution = self.require_evolution()?;
        Ok(evolution.check_rollback(agent_id)?)
    }

    pub fn record_shadow(
        &self,
        agent_id: &str,
        side: ShadowSide,
        outcome: ShadowOutcome,
    ) -> Result<()> {
        let evolution = self.require_evolution()?;
        evolution.record_shadow(agent_id, side, outcome);
        Ok(())
    }

    fn require_evolution(&self) -> Result<&Arc<EvolutionEngine>> {
        self.evolution.as_ref().ok_or_else(|| {
            Error::Config("evolution requires a configured LLM client".to_string())
        })
    }

    // ---- Auth ----

    pub fn authorize(
        &self,
        token: Option<&str>,
        op: ApiOperation,
        agent_id: Option<&str>,
        source_ip: Option<&str>,
    ) -> Result<()> {
        self.auth.authorize(token, op, agent_id, source_ip)
    }

    pub fn issue_token(
        &self,
        role: Role,
        agent_binding: Option<String>,
        ip_binding: Option<String>,
    ) -> IssuedToken {
        self.auth.issue(role, None, agent_binding, ip_binding)
    }

    // ---- Introspection / shutdown ----

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn dropped_jobs(&self) -> (u64, u64, u64) {
        (
            self.trace_queue.dropped_count(),
            self.detect_queue.dropped_count(),
            self.alert_queue.dropped_count(),
        )
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts.sent_count()
    }

    /// Wait (bounded) for the background queues to drain; test helper and
    /// graceful-shutdown building block.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.trace_queue.is_empty()
                && self.detect_queue.is_empty()
                && self.alert_queue.is_empty()
            {
                // One extra beat for in-flight jobs popped but not finished.
                std::thread::sleep(Duration::from_millis(60));
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Stop background workers (drains up to the 10 s grace window) and
    /// flush session state.
    pub fn shutdown(&self) {
        info!("warden shutting down");
        self.workers.shutdown(SHUTDOWN_GRACE);
        self.sessions.flush_dirty();
    }
}

fn validate_request(request: &ActionRequest) -> Result<()> {
    if request.agent_id.is_empty() {
        return Err(Error::Validation("agent_id is required".into()));
    }
    if request.action.name.is_empty() {
        return Err(Error::Validation("action.name is required".into()));
    }
    Ok(())
}

fn parse_params(raw: &str) -> Result<serde_json::Value> {
    if raw.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(raw)
        .map_err(|e| Error::Validation(format!("action.params is not valid JSON: {}", e)))
}

fn metadata_json(metadata: &std::collections::HashMap<String, String>) -> serde_json::Value {
    if metadata.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::to_value(metadata).unwrap_or(serde_json::Value::Null)
    }
}
