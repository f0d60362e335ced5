use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of a shadow test an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowSide {
    Current,
    Candidate,
}

/// One scored run on one side. Candidate outputs are scored and discarded;
/// only these numbers survive.
#[derive(Debug, Clone, Copy)]
pub struct ShadowOutcome {
    pub success: bool,
    pub error: bool,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SideAccumulator {
    runs: usize,
    successes: usize,
    errors: usize,
    total_cost: f64,
    total_latency_ms: u64,
}

impl SideAccumulator {
    fn record(&mut self, outcome: ShadowOutcome) {
        self.runs += 1;
        if outcome.success {
            self.successes += 1;
        }
        if outcome.error {
            self.errors += 1;
        }
        self.total_cost += outcome.cost_usd;
        self.total_latency_ms += outcome.latency_ms;
    }

    fn metrics(&self) -> ShadowMetrics {
        let n = self.runs.max(1) as f64;
        ShadowMetrics {
            runs: self.runs,
            success_rate: self.successes as f64 / n,
            avg_cost: self.total_cost / n,
            avg_latency_ms: self.total_latency_ms as f64 / n,
            error_rate: self.errors as f64 / n,
        }
    }
}

/// Aggregated per-side shadow metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowMetrics {
    pub runs: usize,
    pub success_rate: f64,
    pub avg_cost: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

const COST_REF: f64 = 0.05;
const LATENCY_REF_MS: f64 = 5_000.0;

impl ShadowMetrics {
    /// Composite in 0..=1, same weighting family as session scoring
    /// (success doubles as the completion signal in shadow runs).
    pub fn composite(&self) -> f64 {
        let cost_efficiency = 1.0 / (1.0 + self.avg_cost / COST_REF);
        let latency_score = 1.0 / (1.0 + self.avg_latency_ms / LATENCY_REF_MS);
        0.30 * self.success_rate
            + 0.25 * cost_efficiency
            + 0.25 * self.success_rate
            + 0.10 * (1.0 - self.error_rate)
            + 0.10 * latency_score
    }
}

/// One in-flight shadow test for one agent.
#[derive(Debug)]
pub struct ShadowTest {
    pub agent_id: String,
    pub candidate_version: u32,
    pub started_at: DateTime<Utc>,
    current: SideAccumulator,
    candidate: SideAccumulator,
}

impl ShadowTest {
    pub fn new(agent_id: &str, candidate_version: u32) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            candidate_version,
            started_at: Utc::now(),
            current: SideAccumulator::default(),
            candidate: SideAccumulator::default(),
        }
    }

    pub fn record(&mut self, side: ShadowSide, outcome: ShadowOutcome) {
        match side {
            ShadowSide::Current => self.current.record(outcome),
            ShadowSide::Candidate => self.candidate.record(outcome),
        }
    }

    pub fn metrics(&self, side: ShadowSide) -> ShadowMetrics {
        match side {
            ShadowSide::Current => self.current.metrics(),
            ShadowSide::Candidate => self.candidate.metrics(),
        }
    }

    /// Runs counted on the side with fewer samples; comparison gates on this.
    pub fn paired_runs(&self) -> usize {
        self.current.runs.min(self.candidate.runs)
    }

    pub fn results_json(&self) -> serde_json::Value {
        serde_json::json!({
            "candidate_version": self.candidate_version,
            "started_at": self.started_at.to_rfc3339(),
            "current": self.metrics(ShadowSide::Current),
            "candidate": self.metrics(ShadowSide::Candidate),
        })
    }
}

/// Registry of active shadow tests, one per agent.
#[derive(Default)]
pub struct ShadowRegistry {
    tests: Mutex<HashMap<String, ShadowTest>>,
}

impl ShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, agent_id: &str, candidate_version: u32) {
        self.tests
            .lock()
            .insert(agent_id.to_string(), ShadowTest::new(agent_id, candidate_version));
    }

    pub fn is_active(&self, agent_id: &str) -> bool {
        self.tests.lock().contains_key(agent_id)
    }

    pub fn record(&self, agent_id: &str, side: ShadowSide, outcome: ShadowOutcome) -> bool {
        let mut tests = self.tests.lock();
        match tests.get_mut(agent_id) {
            Some(test) => {
                test.record(side, outcome);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(
        &self,
        agent_id: &str,
    ) -> Option<(u32, usize, ShadowMetrics, ShadowMetrics)> {
        let tests = self.tests.lock();
        tests.get(agent_id).map(|test| {
            (
                test.candidate_version,
                test.paired_runs(),
                test.metrics(ShadowSide::Current),
                test.metrics(ShadowSide::Candidate),
            )
        })
    }

    pub fn finish(&self, agent_id: &str) -> Option<ShadowTest> {
        self.tests.lock().remove(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, cost: f64, latency: u64) -> ShadowOutcome {
        ShadowOutcome {
            success,
            error: !success,
            cost_usd: cost,
            latency_ms: latency,
        }
    }

    #[test]
    fn test_sides_accumulate_independently() {
        let mut test = ShadowTest::new("a1", 3);
        test.record(ShadowSide::Current, outcome(true, 0.01, 100));
        test.record(ShadowSide::Current, outcome(false, 0.01, 100));
        test.record(ShadowSide::Candidate, outcome(true, 0.005, 80));

        let current = test.metrics(ShadowSide::Current);
        let candidate = test.metrics(ShadowSide::Candidate);
        assert_eq!(current.runs, 2);
        assert_eq!(current.success_rate, 0.5);
        assert_eq!(candidate.runs, 1);
        assert_eq!(candidate.success_rate, 1.0);
        assert_eq!(test.paired_runs(), 1);
    }

    #[test]
    fn test_better_candidate_scores_higher() {
        let mut test = ShadowTest::new("a1", 2);
        for _ in 0..10 {
            test.record(ShadowSide::Current, outcome(false, 0.05, 2000));
            test.record(ShadowSide::Candidate, outcome(true, 0.01, 500));
        }
        let current = test.metrics(ShadowSide::Current).composite();
        let candidate = test.metrics(ShadowSide::Candidate).composite();
        assert!(candidate > current);
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = ShadowRegistry::new();
        assert!(!registry.is_active("a1"));
        assert!(!registry.record("a1", ShadowSide::Current, outcome(true, 0.0, 0)));

        registry.start("a1", 4);
        assert!(registry.is_active("a1"));
        assert!(registry.record("a1", ShadowSide::Candidate, outcome(true, 0.0, 10)));

        let (version, paired, _, candidate) = registry.snapshot("a1").unwrap();
        assert_eq!(version, 4);
        assert_eq!(paired, 0);
        assert_eq!(candidate.runs, 1);

        let finished = registry.finish("a1").unwrap();
        assert_eq!(finished.candidate_version, 4);
        assert!(!registry.is_active("a1"));
    }
}
