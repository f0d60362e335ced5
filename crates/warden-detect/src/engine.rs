use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use warden_llm::LlmClient;

use crate::config::DetectionConfig;
use crate::detectors::{
    CostAnomalyDetector, Detector, DriftDetector, LoopDetector, SpiralDetector, VelocityDetector,
};
use crate::events::{ActionEvent, DetectionEvent, DetectorAction};
use crate::playbook::run_playbook;

type EventCallback = Box<dyn Fn(&DetectionEvent) + Send + Sync>;

/// Fans one action stream to all five detectors and resolves playbook
/// escalations. Detector failures are swallowed and logged; detection never
/// blocks or fails an action.
pub struct DetectionEngine {
    detectors: Vec<Mutex<Box<dyn Detector>>>,
    callback: EventCallback,
    playbooks_dir: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
    playbook_model: String,
    playbook_timeout: Duration,
}

impl DetectionEngine {
    pub fn new(config: DetectionConfig, callback: EventCallback) -> Self {
        let detectors: Vec<Mutex<Box<dyn Detector>>> = vec![
            Mutex::new(Box::new(LoopDetector::new(config.loop_detection.clone()))),
            Mutex::new(Box::new(CostAnomalyDetector::new(config.cost_anomaly.clone()))),
            Mutex::new(Box::new(SpiralDetector::new(config.spiral.clone()))),
            Mutex::new(Box::new(VelocityDetector::new(config.velocity.clone()))),
            Mutex::new(Box::new(DriftDetector::new(config.drift.clone()))),
        ];
        Self {
            detectors,
            callback,
            playbooks_dir: PathBuf::from("playbooks"),
            llm: None,
            playbook_model: "gpt-4o-mini".to_string(),
            playbook_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_playbooks(
        mut self,
        dir: PathBuf,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.playbooks_dir = dir;
        self.llm = Some(llm);
        self.playbook_model = model.into();
        self.playbook_timeout = timeout;
        self
    }

    /// Feed one action to every detector. Returns the events emitted (also
    /// delivered through the callback).
    pub fn observe(&self, event: &ActionEvent) -> Vec<DetectionEvent> {
        let mut emitted = Vec::new();

        for slot in &self.detectors {
            let mut detector = slot.lock();
            let name = detector.name();
            match detector.observe(event) {
                Ok(Some(detection)) => {
                    let action = self.resolve_action(&**detector, name, &detection, event);
                    let resolved = DetectionEvent {
                        detector: name,
                        session_id: event.session_id.clone(),
                        agent_id: event.agent_id.clone(),
                        message: detection.message.clone(),
                        details: detection.details.clone(),
                        action,
                    };
                    (self.callback)(&resolved);
                    emitted.push(resolved);
                }
                Ok(None) => {}
                Err(err) => {
                    // Detector faults must never reach the hot path.
                    warn!(detector = name, error = %err, "detector failed");
                }
            }
        }

        emitted
    }

    /// Drop all per-session state (session ended).
    pub fn forget_session(&self, session_id: &str) {
        for slot in &self.detectors {
            slot.lock().forget_session(session_id);
        }
    }

    fn resolve_action(
        &self,
        detector: &dyn Detector,
        name: &'static str,
        detection: &crate::detectors::Detection,
        event: &ActionEvent,
    ) -> DetectorAction {
        if detection.action != DetectorAction::Playbook {
            return detection.action;
        }
        let fallback = detector.fallback_action();
        let Some(llm) = &self.llm else {
            warn!(detector = name, "playbook requested but no LLM configured");
            return fallback;
        };
        match run_playbook(
            llm.as_ref(),
            &self.playbooks_dir,
            name,
            &self.playbook_model,
            self.playbook_timeout,
            detection,
            event,
        ) {
            Ok(action) => action,
            Err(err) => {
                warn!(detector = name, error = %err, "playbook failed, using fallback");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoopConfig;
    use chrono::Utc;
    use parking_lot::Mutex as PlMutex;
    use warden_llm::MockLlm;
    use warden_types::ActionType;

    fn event(session: &str, name: &str) -> ActionEvent {
        ActionEvent {
            session_id: session.to_string(),
            agent_id: "agent-1".to_string(),
            action_type: ActionType::ToolCall,
            action_name: name.to_string(),
            model: None,
            cost_usd: 0.001,
            output: None,
            timestamp: Utc::now(),
        }
    }

    fn collecting_engine(config: DetectionConfig) -> (DetectionEngine, Arc<PlMutex<Vec<DetectionEvent>>>) {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = DetectionEngine::new(
            config,
            Box::new(move |detection| {
                sink.lock().push(detection.clone());
            }),
        );
        (engine, seen)
    }

    #[test]
    fn test_loop_event_reaches_callback() {
        let config = DetectionConfig {
            loop_detection: LoopConfig {
                threshold: 3,
                window_seconds: 60,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, seen) = collecting_engine(config);

        for _ in 0..5 {
            engine.observe(&event("ses_1", "search"));
        }

        let seen = seen.lock();
        let loops: Vec<_> = seen.iter().filter(|e| e.detector == "loop").collect();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].action, DetectorAction::Pause);
        assert_eq!(loops[0].session_id, "ses_1");
    }

    #[test]
    fn test_playbook_action_resolved_via_llm() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("LOOP.md"), "terminate loops").unwrap();

        let config = DetectionConfig {
            loop_detection: LoopConfig {
                threshold: 2,
                window_seconds: 60,
                action: DetectorAction::Playbook,
                fallback_action: DetectorAction::Pause,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, seen) = collecting_engine(config);
        let mock = Arc::new(MockLlm::new(r#"{"action": "terminate"}"#));
        let engine = engine.with_playbooks(
            tmp.path().to_path_buf(),
            mock,
            "test-model",
            Duration::from_secs(5),
        );

        for _ in 0..4 {
            engine.observe(&event("ses_1", "search"));
        }

        let seen = seen.lock();
        let loops: Vec<_> = seen.iter().filter(|e| e.detector == "loop").collect();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].action, DetectorAction::Terminate);
    }

    #[test]
    fn test_playbook_failure_uses_fallback() {
        let tmp = tempfile::TempDir::new().unwrap();
        // No playbook file written: the playbook call fails.

        let config = DetectionConfig {
            loop_detection: LoopConfig {
                threshold: 2,
                window_seconds: 60,
                action: DetectorAction::Playbook,
                fallback_action: DetectorAction::Pause,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, seen) = collecting_engine(config);
        let mock = Arc::new(MockLlm::new(r#"{"action": "terminate"}"#));
        let engine = engine.with_playbooks(
            tmp.path().to_path_buf(),
            mock,
            "test-model",
            Duration::from_secs(5),
        );

        for _ in 0..4 {
            engine.observe(&event("ses_1", "search"));
        }

        let seen = seen.lock();
        let loops: Vec<_> = seen.iter().filter(|e| e.detector == "loop").collect();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].action, DetectorAction::Pause);
    }

    #[test]
    fn test_forget_session_clears_state() {
        let config = DetectionConfig {
            loop_detection: LoopConfig {
                threshold: 3,
                window_seconds: 60,
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, seen) = collecting_engine(config);

        for _ in 0..3 {
            engine.observe(&event("ses_1", "search"));
        }
        engine.forget_session("ses_1");
        engine.observe(&event("ses_1", "search"));

        assert!(seen.lock().iter().all(|e| e.detector != "loop"));
    }
}
