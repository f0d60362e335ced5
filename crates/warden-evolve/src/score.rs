use serde::{Deserialize, Serialize};

use warden_store::SessionTraceStats;
use warden_types::Session;

/// Composite weights. Error rate and latency are inverted before weighting.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoreWeights {
    pub success: f64,
    pub cost_efficiency: f64,
    pub task_completion: f64,
    pub error: f64,
    pub latency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success: 0.30,
            cost_efficiency: 0.25,
            task_completion: 0.25,
            error: 0.10,
            latency: 0.10,
        }
    }
}

/// Score of one session, all components normalized to 0..=1.
#[derive(Debug, Clone, Serialize)]
pub struct SessionScore {
    pub session_id: String,
    pub success_rate: f64,
    pub cost_efficiency: f64,
    pub task_completion: f64,
    pub error_rate: f64,
    pub latency_score: f64,
    pub composite: f64,
}

/// Reference points for normalizing cost and latency into 0..=1.
const COST_PER_ACTION_REF: f64 = 0.05; // $ per action considered "expensive"
const LATENCY_REF_MS: f64 = 5_000.0;

pub fn score_session(
    session: &Session,
    stats: &SessionTraceStats,
    weights: &ScoreWeights,
) -> SessionScore {
    let success_rate = stats.success_rate();
    let error_rate = stats.error_rate();

    let cost_per_action = if stats.total > 0 {
        stats.total_cost / stats.total as f64
    } else {
        0.0
    };
    let cost_efficiency = 1.0 / (1.0 + cost_per_action / COST_PER_ACTION_REF);

    // Completion: an explicit score from the SDK wins; otherwise a completed
    // session counts as done, a terminated one as not.
    let task_completion = session
        .score
        .as_ref()
        .and_then(|s| s.get("task_completion"))
        .and_then(|v| v.as_f64())
        .unwrap_or(match session.status {
            warden_types::SessionStatus::Completed => 1.0,
            warden_types::SessionStatus::Terminated => 0.0,
            _ => 0.5,
        })
        .clamp(0.0, 1.0);

    let latency_score = 1.0 / (1.0 + stats.avg_latency_ms / LATENCY_REF_MS);

    let composite = weights.success * success_rate
        + weights.cost_efficiency * cost_efficiency
        + weights.task_completion * task_completion
        + weights.error * (1.0 - error_rate)
        + weights.latency * latency_score;

    SessionScore {
        session_id: session.id.clone(),
        success_rate,
        cost_efficiency,
        task_completion,
        error_rate,
        latency_score,
        composite,
    }
}

/// Aggregate score for everything an agent version did inside the scoring
/// window.
#[derive(Debug, Clone, Serialize)]
pub struct VersionScore {
    pub agent_id: String,
    pub sessions: usize,
    pub composite: f64,
    pub avg_success_rate: f64,
    pub avg_error_rate: f64,
    pub avg_cost_efficiency: f64,
}

pub fn aggregate(agent_id: &str, scores: &[SessionScore]) -> VersionScore {
    if scores.is_empty() {
        return VersionScore {
            agent_id: agent_id.to_string(),
            sessions: 0,
            composite: 0.0,
            avg_success_rate: 0.0,
            avg_error_rate: 0.0,
            avg_cost_efficiency: 0.0,
        };
    }
    let n = scores.len() as f64;
    VersionScore {
        agent_id: agent_id.to_string(),
        sessions: scores.len(),
        composite: scores.iter().map(|s| s.composite).sum::<f64>() / n,
        avg_success_rate: scores.iter().map(|s| s.success_rate).sum::<f64>() / n,
        avg_error_rate: scores.iter().map(|s| s.error_rate).sum::<f64>() / n,
        avg_cost_efficiency: scores.iter().map(|s| s.cost_efficiency).sum::<f64>() / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::SessionStatus;

    fn session(status: SessionStatus) -> Session {
        let mut s = Session::new("ses_1".into(), "a1".into(), Utc::now());
        s.status = status;
        s
    }

    fn stats(total: usize, allowed: usize, denied: usize) -> SessionTraceStats {
        SessionTraceStats {
            total,
            allowed,
            denied,
            avg_latency_ms: 100.0,
            total_cost: 0.01,
            ..Default::default()
        }
    }

    #[test]
    fn test_perfect_session_scores_high() {
        let score = score_session(
            &session(SessionStatus::Completed),
            &stats(10, 10, 0),
            &ScoreWeights::default(),
        );
        assert!(score.composite > 0.9, "composite was {}", score.composite);
    }

    #[test]
    fn test_failing_session_scores_low() {
        let score = score_session(
            &session(SessionStatus::Terminated),
            &stats(10, 2, 8),
            &ScoreWeights::default(),
        );
        assert!(score.composite < 0.5, "composite was {}", score.composite);
    }

    #[test]
    fn test_explicit_task_completion_wins() {
        let mut s = session(SessionStatus::Completed);
        s.score = Some(serde_json::json!({"task_completion": 0.2}));
        let score = score_session(&s, &stats(10, 10, 0), &ScoreWeights::default());
        assert!((score.task_completion - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_means() {
        let a = score_session(
            &session(SessionStatus::Completed),
            &stats(10, 10, 0),
            &ScoreWeights::default(),
        );
        let b = score_session(
            &session(SessionStatus::Terminated),
            &stats(10, 0, 10),
            &ScoreWeights::default(),
        );
        let agg = aggregate("a1", &[a.clone(), b.clone()]);
        assert_eq!(agg.sessions, 2);
        let expected = (a.composite + b.composite) / 2.0;
        assert!((agg.composite - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_aggregate_is_zero() {
        let agg = aggregate("a1", &[]);
        assert_eq!(agg.sessions, 0);
        assert_eq!(agg.composite, 0.0);
    }
}
