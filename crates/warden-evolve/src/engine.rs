use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use warden_llm::{extract_json, ChatMessage, ChatRequest, LlmClient};
use warden_store::{Store, TraceFilter};
use warden_types::{AgentVersion, Trace, TraceStatus, VersionStatus};

use crate::analyze::{analyze_agent, Analysis};
use crate::compare::{compare_composites, Recommendation};
use crate::monitor::RollbackTrigger;
use crate::score::{aggregate, score_session, ScoreWeights, VersionScore};
use crate::shadow::{ShadowOutcome, ShadowRegistry, ShadowSide};
use crate::versions::VersionTree;
use crate::{Error, Result};

/// Risk attached to a proposed prompt change. Gates automation: `high`
/// requires human review, `critical` is never auto-promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Proposed replacement prompt from the propose stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub new_prompt: String,
    #[serde(default)]
    pub diff_summary: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_risk")]
    pub risk: RiskLevel,
}

fn default_risk() -> RiskLevel {
    RiskLevel::Medium
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvolveConfig {
    #[serde(default = "default_window_hours")]
    pub scoring_window_hours: u64,
    #[serde(default = "default_min_shadow_runs")]
    pub min_shadow_runs: usize,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_seconds: u64,
    #[serde(default = "default_failure_samples")]
    pub max_failure_samples: usize,
    /// e.g. `error_rate increases by 10% within 1h`
    #[serde(default)]
    pub rollback_trigger: Option<String>,
    #[serde(default = "default_auto_risk")]
    pub auto_promote_max_risk: RiskLevel,
    #[serde(default)]
    pub weights: Option<ScoreWeights>,
}

fn default_window_hours() -> u64 {
    24
}
fn default_min_shadow_runs() -> usize {
    10
}
fn default_success_threshold() -> f64 {
    0.05
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_failure_samples() -> usize {
    10
}
fn default_auto_risk() -> RiskLevel {
    RiskLevel::Medium
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            scoring_window_hours: default_window_hours(),
            min_shadow_runs: default_min_shadow_runs(),
            success_threshold: default_success_threshold(),
            model: default_model(),
            llm_timeout_seconds: default_llm_timeout(),
            max_failure_samples: default_failure_samples(),
            rollback_trigger: None,
            auto_promote_max_risk: default_auto_risk(),
            weights: None,
        }
    }
}

/// What one evolution cycle did for an agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CycleOutcome {
    NoSessions,
    Healthy,
    ShadowStarted { candidate_version: u32 },
    ShadowContinuing { paired_runs: usize },
    Promoted { version: u32, improvement_ratio: f64 },
    Rejected { improvement_ratio: f64 },
    NeedsHumanReview { candidate_version: u32, risk: RiskLevel },
}

/// The analyze → propose → shadow → compare → promote/rollback loop.
pub struct EvolutionEngine {
    store: Arc<Store>,
    llm: Arc<dyn LlmClient>,
    tree: VersionTree,
    registry: ShadowRegistry,
    candidate_risk: Mutex<HashMap<String, RiskLevel>>,
    config: EvolveConfig,
    trigger: Option<RollbackTrigger>,
    weights: ScoreWeights,
}

impl EvolutionEngine {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<dyn LlmClient>,
        tree: VersionTree,
        config: EvolveConfig,
    ) -> Result<Self> {
        let trigger = match &config.rollback_trigger {
            Some(source) => Some(RollbackTrigger::parse(source)?),
            None => None,
        };
        let weights = config.weights.unwrap_or_default();
        Ok(Self {
            store,
            llm,
            tree,
            registry: ShadowRegistry::new(),
            candidate_risk: Mutex::new(HashMap::new()),
            config,
            trigger,
            weights,
        })
    }

    pub fn tree(&self) -> &VersionTree {
        &self.tree
    }

    pub fn shadow_active(&self, agent_id: &str) -> bool {
        self.registry.is_active(agent_id)
    }

    /// Record one shadow run outcome for a side. No-op when no shadow test
    /// is active for the agent.
    pub fn record_shadow(&self, agent_id: &str, side: ShadowSide, outcome: ShadowOutcome) {
        self.registry.record(agent_id, side, outcome);
    }

    /// One evolution cycle for one agent. With a shadow test in flight this
    /// is the compare/promote stage; otherwise score → analyze → propose →
    /// shadow-start.
    pub fn run_cycle(&self, agent_id: &str) -> Result<CycleOutcome> {
        if self.registry.is_active(agent_id) {
            return self.conclude_shadow(agent_id);
        }
        self.start_cycle(agent_id)
    }

    fn start_cycle(&self, agent_id: &str) -> Result<CycleOutcome> {
        let score = self.score_agent(agent_id)?;
        if score.sessions == 0 {
            return Ok(CycleOutcome::NoSessions);
        }

        let agent_doc = self.tree.read_agent_doc(agent_id, "AGENT.md").unwrap_or_default();
        let evolve_doc = self.tree.read_agent_doc(agent_id, "EVOLVE.md").unwrap_or_default();
        let current_prompt = match self.tree.active(agent_id)? {
            Some(active) => self.tree.read_prompt(agent_id, &active.name)?,
            None => String::new(),
        };

        let failures = self.recent_failures(agent_id)?;
        let timeout = StdDuration::from_secs(self.config.llm_timeout_seconds);

        let analysis = analyze_agent(
            self.llm.as_ref(),
            &self.config.model,
            timeout,
            &agent_doc,
            &evolve_doc,
            &current_prompt,
            &score,
            &failures,
        )?;

        if analysis.patterns.is_empty() {
            return Ok(CycleOutcome::Healthy);
        }

        let proposal = self.propose(&agent_doc, &evolve_doc, &current_prompt, &analysis)?;
        let candidate_version = self.tree.write_candidate(agent_id, &proposal.new_prompt)?;

        self.store.upsert_version(&AgentVersion {
            id: format!("{}-v{}", agent_id, candidate_version),
            agent_id: agent_id.to_string(),
            version_number: candidate_version,
            created_at: Utc::now(),
            promoted_at: None,
            rolled_back_at: None,
            status: VersionStatus::Shadow,
            system_prompt: proposal.new_prompt.clone(),
            config: serde_json::Value::Null,
            diff_from_prev: Some(proposal.diff_summary.clone()),
            diff_reason: Some(proposal.reason.clone()),
            shadow_results: None,
        })?;

        self.candidate_risk
            .lock()
            .insert(agent_id.to_string(), proposal.risk);
        self.registry.start(agent_id, candidate_version);
        info!(agent = agent_id, version = candidate_version, "shadow test started");

        Ok(CycleOutcome::ShadowStarted { candidate_version })
    }

    fn conclude_shadow(&self, agent_id: &str) -> Result<CycleOutcome> {
        let Some((candidate_version, paired_runs, current, candidate)) =
            self.registry.snapshot(agent_id)
        else {
            return Ok(CycleOutcome::Healthy);
        };

        let (recommendation, improvement_ratio) = compare_composites(
            current.composite(),
            candidate.composite(),
            paired_runs,
            self.config.min_shadow_runs,
            self.config.success_threshold,
        );

        match recommendation {
            Recommendation::ExtendShadow => Ok(CycleOutcome::ShadowContinuing { paired_runs }),
            Recommendation::Reject => {
                self.finish_shadow(agent_id, candidate_version)?;
                self.tree.discard_candidate(agent_id)?;
                self.store.update_version_status(
                    agent_id,
                    candidate_version,
                    VersionStatus::Retired,
                    Utc::now(),
                )?;
                info!(agent = agent_id, ratio = improvement_ratio, "candidate rejected");
                Ok(CycleOutcome::Rejected { improvement_ratio })
            }
            Recommendation::Promote => {
                let risk = self
                    .candidate_risk
                    .lock()
                    .get(agent_id)
                    .copied()
                    .unwrap_or(RiskLevel::Medium);
                if risk > self.config.auto_promote_max_risk || risk == RiskLevel::Critical {
                    return Ok(CycleOutcome::NeedsHumanReview {
                        candidate_version,
                        risk,
                    });
                }
                self.promote(agent_id, candidate_version)?;
                Ok(CycleOutcome::Promoted {
                    version: candidate_version,
                    improvement_ratio,
                })
            }
        }
    }

    /// Promote the candidate: rename on disk, retire the predecessor, record
    /// shadow results.
    pub fn promote(&self, agent_id: &str, candidate_version: u32) -> Result<u32> {
        let predecessor = self.tree.active(agent_id)?;
        let promoted = self.tree.promote(agent_id)?;
        if promoted != candidate_version {
            warn!(
                agent = agent_id,
                expected = candidate_version,
                actual = promoted,
                "promoted a different candidate than the shadow test tracked"
            );
        }

        let now = Utc::now();
        if let Some(test) = self.registry.finish(agent_id) {
            let mut row = self
                .store
                .get_version(agent_id, promoted)?
                .unwrap_or_else(|| placeholder_version(agent_id, promoted, now));
            row.status = VersionStatus::Active;
            row.promoted_at = Some(now);
            row.shadow_results = Some(test.results_json());
            self.store.upsert_version(&row)?;
        } else {
            self.store
                .update_version_status(agent_id, promoted, VersionStatus::Active, now)?;
        }

        if let Some(previous) = predecessor {
            self.store.update_version_status(
                agent_id,
                previous.number,
                VersionStatus::Retired,
                now,
            )?;
        }
        self.store.set_agent_current_version(agent_id, promoted)?;
        self.candidate_risk.lock().remove(agent_id);
        Ok(promoted)
    }

    fn finish_shadow(&self, agent_id: &str, candidate_version: u32) -> Result<()> {
        if let Some(test) = self.registry.finish(agent_id)
            && let Some(mut row) = self.store.get_version(agent_id, candidate_version)?
        {
            row.shadow_results = Some(test.results_json());
            self.store.upsert_version(&row)?;
        }
        self.candidate_risk.lock().remove(agent_id);
        Ok(())
    }

    /// Post-promotion monitor. Evaluates the rollback trigger against the
    /// configured window vs the preceding 2× window; on firing performs the
    /// rollback and returns `(rolled_back, restored)`.
    pub fn check_rollback(&self, agent_id: &str) -> Result<Option<(u32, u32)>> {
        let Some(trigger) = &self.trigger else {
            return Ok(None);
        };

        let now = Utc::now();
        let window_start = now - trigger.window;
        let baseline_start = window_start - trigger.window * 2;

        let all = self.store.list_traces(&TraceFilter {
            agent_id: Some(agent_id.to_string()),
            since: Some(baseline_start),
            limit: 10_000,
            ..Default::default()
        })?;

        let (current_traces, baseline_traces): (Vec<&Trace>, Vec<&Trace>) =
            all.iter().partition(|t| t.timestamp >= window_start);

        if baseline_traces.is_empty() || current_traces.is_empty() {
            return Ok(None);
        }

        let current_value = metric_value(&trigger.metric, &current_traces)?;
        let baseline_value = metric_value(&trigger.metric, &baseline_traces)?;
        let sessions: std::collections::HashSet<&str> = current_traces
            .iter()
            .map(|t| t.session_id.as_str())
            .collect();

        if !trigger.fires(current_value, baseline_value, sessions.len()) {
            return Ok(None);
        }

        let (rolled_back, restored) = self.tree.rollback(agent_id)?;
        let now = Utc::now();
        self.store
            .update_version_status(agent_id, rolled_back, VersionStatus::RolledBack, now)?;
        self.store
            .update_version_status(agent_id, restored, VersionStatus::Active, now)?;
        self.store.set_agent_current_version(agent_id, restored)?;
        warn!(
            agent = agent_id,
            rolled_back,
            restored,
            metric = %trigger.metric,
            current = current_value,
            baseline = baseline_value,
            "auto-rollback fired"
        );
        Ok(Some((rolled_back, restored)))
    }

    fn score_agent(&self, agent_id: &str) -> Result<VersionScore> {
        let since = Utc::now() - Duration::hours(self.config.scoring_window_hours as i64);
        let sessions = self.store.list_sessions(Some(agent_id), Some(since), 500)?;
        let mut scores = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let stats = self.store.session_trace_stats(&session.id)?;
            scores.push(score_session(session, &stats, &self.weights));
        }
        Ok(aggregate(agent_id, &scores))
    }

    fn recent_failures(&self, agent_id: &str) -> Result<Vec<Trace>> {
        let since = Utc::now() - Duration::hours(self.config.scoring_window_hours as i64);
        let mut failures = Vec::new();
        for status in [
            TraceStatus::Denied,
            TraceStatus::Terminated,
            TraceStatus::Throttled,
        ] {
            failures.extend(self.store.list_traces(&TraceFilter {
                agent_id: Some(agent_id.to_string()),
                status: Some(status),
                since: Some(since),
                limit: self.config.max_failure_samples,
                ..Default::default()
            })?);
        }
        failures.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        failures.truncate(self.config.max_failure_samples);
        Ok(failures)
    }

    fn propose(
        &self,
        agent_doc: &str,
        evolve_doc: &str,
        current_prompt: &str,
        analysis: &Analysis,
    ) -> Result<Proposal> {
        let system = "You rewrite system prompts for AI agents. Reply with JSON only: \
                      {\"new_prompt\": string, \"diff_summary\": string, \"reason\": string, \
                      \"risk\": \"low\"|\"medium\"|\"high\"|\"critical\"}. The new_prompt is a \
                      full replacement, not a patch.";
        let user = format!(
            "# Agent charter\n{}\n\n# Evolution guidance\n{}\n\n# Current prompt\n{}\n\n\
             # Failure analysis\n{}",
            agent_doc,
            evolve_doc,
            current_prompt,
            serde_json::to_string_pretty(analysis).unwrap_or_default(),
        );

        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .with_timeout(StdDuration::from_secs(self.config.llm_timeout_seconds));

        let reply = self.llm.complete(&request)?;
        let parsed = extract_json(&reply)?;
        let proposal: Proposal = serde_json::from_value(parsed)
            .map_err(|e| Error::Llm(warden_llm::Error::Malformed(e.to_string())))?;
        if proposal.new_prompt.trim().is_empty() {
            return Err(Error::Llm(warden_llm::Error::Malformed(
                "proposal contains an empty prompt".into(),
            )));
        }
        Ok(proposal)
    }
}

fn placeholder_version(
    agent_id: &str,
    number: u32,
    now: chrono::DateTime<Utc>,
) -> AgentVersion {
    AgentVersion {
        id: format!("{}-v{}", agent_id, number),
        agent_id: agent_id.to_string(),
        version_number: number,
        created_at: now,
        promoted_at: None,
        rolled_back_at: None,
        status: VersionStatus::Candidate,
        system_prompt: String::new(),
        config: serde_json::Value::Null,
        diff_from_prev: None,
        diff_reason: None,
        shadow_results: None,
    }
}

fn metric_value(metric: &str, traces: &[&Trace]) -> Result<f64> {
    let total = traces.len() as f64;
    if total == 0.0 {
        return Ok(0.0);
    }
    let value = match metric {
        "error_rate" => {
            traces
                .iter()
                .filter(|t| {
                    matches!(t.status, TraceStatus::Denied | TraceStatus::Terminated)
                })
                .count() as f64
                / total
        }
        "success_rate" => {
            traces
                .iter()
                .filter(|t| t.status == TraceStatus::Allowed)
                .count() as f64
                / total
        }
        "avg_cost" => traces.iter().map(|t| t.cost_usd).sum::<f64>() / total,
        "avg_latency_ms" => {
            traces.iter().map(|t| t.latency_ms as f64).sum::<f64>() / total
        }
        other => {
            return Err(Error::Config(format!(
                "unknown rollback metric '{}'",
                other
            )))
        }
    };
    Ok(value)
}
