use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use warden_llm::MockLlm;
use warden_runtime::{ApiOperation, DataLayout, Role, TraceRequest, Warden, WardenConfig};
use warden_store::TraceFilter;
use warden_testing::TestWorld;
use warden_types::{
    ActionRequest, ActionSpec, ActionType, CallerContext, SessionStatus, SystemClock,
    TraceStatus, Verdict,
};

struct Harness {
    world: TestWorld,
    warden: Warden,
    llm: Arc<MockLlm>,
}

fn harness(config: WardenConfig, policies: &[(&str, &str)]) -> Harness {
    let world = TestWorld::new().unwrap();
    for (name, yaml) in policies {
        world.write_policy(name, yaml).unwrap();
    }
    let llm = Arc::new(MockLlm::new(r#"{"allow": true}"#));
    let warden = Warden::start_with(
        DataLayout::new(world.path().to_path_buf()),
        config,
        Some(llm.clone()),
        Arc::new(SystemClock),
    )
    .unwrap();
    Harness { world, warden, llm }
}

fn request(agent: &str, session: &str, action_type: ActionType, name: &str) -> ActionRequest {
    ActionRequest {
        session_id: session.to_string(),
        agent_id: agent.to_string(),
        agent_version: None,
        action: ActionSpec {
            action_type,
            name: name.to_string(),
            params: String::new(),
            target: String::new(),
        },
        context: None,
        metadata: HashMap::new(),
    }
}

#[test]
fn budget_terminate_writes_violation_and_alert() {
    let h = harness(
        WardenConfig::default(),
        &[(
            "budget",
            r#"
rules:
  - name: budget
    type: budget
    condition: "session.cost > 10.0"
    effect: terminate
    message: Session budget exceeded
"#,
        )],
    );

    let mut req = request("billing-agent", "", ActionType::LlmChat, "chat");
    req.context = Some(CallerContext {
        session_cost: Some(10.01),
        ..Default::default()
    });

    let response = h.warden.evaluate(&req).unwrap();
    assert_eq!(response.verdict, Verdict::Terminate);
    assert_eq!(response.policy_name.as_deref(), Some("budget"));
    assert_eq!(response.message, "Session budget exceeded");

    assert!(h.warden.drain(Duration::from_secs(3)));

    // Violation row written, trace recorded as terminated, alert sent once.
    // Read through an independent store handle: WAL serves readers while
    // the sidecar's writer is live.
    let violations = h
        .world
        .store
        .list_violations(Some("billing-agent"), None, 10)
        .unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].effect, Verdict::Terminate);

    let trace = h.warden.get_trace(&response.trace_id).unwrap();
    assert_eq!(trace.status, TraceStatus::Terminated);
    assert_eq!(trace.policy_name.as_deref(), Some("budget"));

    assert_eq!(h.warden.alerts_sent(), 1);

    // The session was hard-terminated.
    let session = h.warden.get_session(&trace.session_id).unwrap();
    assert_eq!(session.status, SessionStatus::Terminated);

    h.warden.shutdown();
}

#[test]
fn shell_block_scenario() {
    let h = harness(
        WardenConfig::default(),
        &[(
            "no-shell",
            r#"
rules:
  - name: no-shell
    condition: 'action.type == "tool.call" && action.name == "shell_exec"'
    effect: deny
"#,
        )],
    );

    let denied = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "shell_exec"))
        .unwrap();
    assert_eq!(denied.verdict, Verdict::Deny);
    assert_eq!(denied.policy_name.as_deref(), Some("no-shell"));

    let allowed = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "search"))
        .unwrap();
    assert_eq!(allowed.verdict, Verdict::Allow);
    assert!(allowed.policy_name.is_none());

    h.warden.shutdown();
}

#[test]
fn loop_detection_pauses_session() {
    let mut config = WardenConfig::default();
    config.detection.loop_detection.threshold = 3;
    config.detection.loop_detection.window_seconds = 60;
    let h = harness(config, &[]);

    let session = h.warden.start_session("loopy", None, serde_json::Value::Null).unwrap();

    // Five identical evaluations; the loop fires after the 4th.
    for _ in 0..5 {
        let response = h
            .warden
            .evaluate(&request("loopy", &session.id, ActionType::ToolCall, "search"))
            .unwrap();
        // Early calls pass; once the detector pauses the session mid-burst,
        // later calls may already see the paused state.
        if response.verdict != Verdict::Allow {
            break;
        }
        assert!(h.warden.drain(Duration::from_secs(3)));
    }
    assert!(h.warden.drain(Duration::from_secs(3)));

    let paused = h.warden.get_session(&session.id).unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);

    // A subsequent evaluation returns a terminal effect for the pause.
    let blocked = h
        .warden
        .evaluate(&request("loopy", &session.id, ActionType::ToolCall, "search"))
        .unwrap();
    assert_eq!(blocked.verdict, Verdict::Deny);
    assert_eq!(blocked.policy_name.as_deref(), Some("session_state"));
    assert!(blocked.message.contains("paused"));

    h.warden.shutdown();
}

#[test]
fn throttle_returns_longest_delay() {
    let h = harness(
        WardenConfig::default(),
        &[(
            "throttles",
            r#"
rules:
  - name: slow-tools
    condition: 'action.type == "tool.call"'
    effect: throttle
    delay_seconds: 2
  - name: slow-search
    condition: 'action.name == "search"'
    effect: throttle
    delay_seconds: 8
"#,
        )],
    );

    let response = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "search"))
        .unwrap();
    assert_eq!(response.verdict, Verdict::Throttle);
    assert_eq!(response.delay_seconds, Some(8));
    assert_eq!(response.policy_name.as_deref(), Some("slow-search"));

    h.warden.shutdown();
}

#[test]
fn approval_parks_and_resolves() {
    let h = harness(
        WardenConfig::default(),
        &[(
            "review",
            r#"
rules:
  - name: manual-review
    type: approval
    condition: 'action.type == "financial.transfer"'
    approvers: [ops@example.com]
    timeout_minutes: 30
    timeout_effect: deny
"#,
        )],
    );

    let mut req = request("payer", "", ActionType::FinancialTransfer, "wire");
    req.action.params = r#"{"amount": 900.0}"#.to_string();
    let response = h.warden.evaluate(&req).unwrap();
    assert_eq!(response.verdict, Verdict::Approve);
    assert_eq!(response.timeout_seconds, Some(1800));
    let approval_id = response.approval_id.unwrap();

    let pending = h.warden.list_pending_approvals().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, approval_id);

    let resolved = h.warden.approve(&approval_id, "ops@example.com").unwrap();
    assert_eq!(resolved.status, warden_types::ApprovalStatus::Approved);
    assert!(h.warden.list_pending_approvals().unwrap().is_empty());

    h.warden.shutdown();
}

#[test]
fn kill_switch_beats_policies_and_is_durably_logged() {
    let h = harness(WardenConfig::default(), &[]);

    h.warden.kill(
        warden_policy::KillScope::Global,
        None,
        "incident drill",
        warden_policy::KillSource::Api,
    );

    let blocked = h
        .warden
        .evaluate(&request("anyone", "", ActionType::ToolCall, "anything"))
        .unwrap();
    assert_eq!(blocked.verdict, Verdict::Terminate);
    assert_eq!(blocked.policy_name.as_deref(), Some("kill_switch"));

    h.warden.kill_reset(
        warden_policy::KillScope::Global,
        None,
        warden_policy::KillSource::Api,
    );
    let restored = h
        .warden
        .evaluate(&request("anyone", "", ActionType::ToolCall, "anything"))
        .unwrap();
    assert_eq!(restored.verdict, Verdict::Allow);

    // Trigger + reset are durably logged.
    assert_eq!(h.warden.store().count_kill_events().unwrap(), 2);
    assert!(h.warden.kill_status().history_count >= 2);

    h.warden.shutdown();
}

#[test]
fn judge_rule_consults_llm() {
    let h = harness(
        WardenConfig::default(),
        &[(
            "judge",
            r#"
rules:
  - name: risk-judge
    type: ai-judge
    prompt: "Deny anything touching credentials."
"#,
        )],
    );

    // Default mock reply allows.
    let allowed = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "fetch"))
        .unwrap();
    assert_eq!(allowed.verdict, Verdict::Allow);

    h.llm
        .push_reply(r#"{"allow": false, "reason": "reads credential store"}"#);
    let denied = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "read_secrets"))
        .unwrap();
    assert_eq!(denied.verdict, Verdict::Deny);
    assert!(denied.message.contains("credential"));

    h.warden.shutdown();
}

#[test]
fn hot_reload_swaps_ruleset_atomically() {
    let h = harness(
        WardenConfig::default(),
        &[(
            "10-first",
            r#"
rules:
  - name: block-search
    condition: 'action.name == "search"'
    effect: deny
"#,
        )],
    );

    let before = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "search"))
        .unwrap();
    assert_eq!(before.verdict, Verdict::Deny);

    // Replace the policy file and reload explicitly.
    let dir = h.world.policies_dir().join("10-first");
    std::fs::write(
        dir.join("policy.yaml"),
        r#"
rules:
  - name: block-fetch
    condition: 'action.name == "fetch"'
    effect: deny
"#,
    )
    .unwrap();
    let count = h.warden.reload_policies().unwrap();
    assert_eq!(count, 1);

    let search = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "search"))
        .unwrap();
    assert_eq!(search.verdict, Verdict::Allow);
    let fetch = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "fetch"))
        .unwrap();
    assert_eq!(fetch.verdict, Verdict::Deny);

    // A broken edit is rejected and the running set stays.
    std::fs::write(dir.join("policy.yaml"), "rules:\n  - name: broken\n    condition: 'nope'")
        .unwrap();
    assert!(h.warden.reload_policies().is_err());
    let still_denied = h
        .warden
        .evaluate(&request("a1", "", ActionType::ToolCall, "fetch"))
        .unwrap();
    assert_eq!(still_denied.verdict, Verdict::Deny);

    h.warden.shutdown();
}

#[test]
fn recorded_traces_accumulate_cost_and_chain() {
    let h = harness(WardenConfig::default(), &[]);
    let session = h
        .warden
        .start_session("biller", None, serde_json::Value::Null)
        .unwrap();

    for i in 0..3 {
        let trace_request = TraceRequest {
            action: request("biller", &session.id, ActionType::LlmChat, "chat"),
            request_body: format!("prompt {}", i),
            response_body: "answer".to_string(),
            tokens_in: Some(1000),
            tokens_out: Some(500),
            latency_ms: 42,
            model: Some("gpt-4o-mini".to_string()),
            status: None,
        };
        h.warden.record_trace(&trace_request).unwrap();
    }
    assert!(h.warden.drain(Duration::from_secs(3)));

    // In-memory cost is visible immediately and matches the trace sum.
    let live = h.warden.get_session(&session.id).unwrap();
    let expected_each = (1000.0 * 0.15 + 500.0 * 0.60) / 1_000_000.0;
    assert!((live.total_cost - 3.0 * expected_each).abs() < 1e-9);
    assert_eq!(live.action_count, 3);

    let (ok, broken) = h.warden.verify_chain(&session.id).unwrap();
    assert!(ok, "chain broken at {:?}", broken);

    let summary = h.warden.end_session(&session.id).unwrap();
    assert_eq!(summary.total_actions, 3);
    assert_eq!(summary.violation_count, 0);
    assert_eq!(summary.session.status, SessionStatus::Completed);

    h.warden.shutdown();
}

#[test]
fn post_hoc_terminate_is_advisory_only() {
    let h = harness(WardenConfig::default(), &[]);
    let session = h
        .warden
        .start_session("poster", None, serde_json::Value::Null)
        .unwrap();

    let trace_request = TraceRequest {
        action: request("poster", &session.id, ActionType::ToolCall, "deploy"),
        request_body: String::new(),
        response_body: String::new(),
        tokens_in: None,
        tokens_out: None,
        latency_ms: 5,
        model: None,
        status: Some(TraceStatus::Terminated),
    };
    let trace_id = h.warden.record_trace(&trace_request).unwrap();
    assert!(h.warden.drain(Duration::from_secs(3)));

    // The status is recorded but the session keeps running.
    assert_eq!(
        h.warden.get_trace(&trace_id).unwrap().status,
        TraceStatus::Terminated
    );
    assert_eq!(
        h.warden.get_session(&session.id).unwrap().status,
        SessionStatus::Active
    );

    h.warden.shutdown();
}

#[test]
fn capability_boundary_denies_before_rules() {
    let mut config = WardenConfig::default();
    config.capabilities.insert(
        "scoped-agent".to_string(),
        warden_policy::CapabilityConfig {
            fs_allow: vec!["/workspace/**".to_string()],
            ..Default::default()
        },
    );
    let h = harness(config, &[]);

    let mut req = request("scoped-agent", "", ActionType::FileWrite, "write");
    req.action.params = r#"{"path": "/etc/passwd"}"#.to_string();
    let denied = h.warden.evaluate(&req).unwrap();
    assert_eq!(denied.verdict, Verdict::Deny);
    assert_eq!(denied.policy_name.as_deref(), Some("capability"));

    req.action.params = r#"{"path": "/workspace/out.txt"}"#.to_string();
    let allowed = h.warden.evaluate(&req).unwrap();
    assert_eq!(allowed.verdict, Verdict::Allow);

    h.warden.shutdown();
}

#[test]
fn auth_roles_gate_operations() {
    let mut config = WardenConfig::default();
    config.auth.enabled = true;
    let h = harness(config, &[]);

    // No token, no service.
    assert!(h
        .warden
        .authorize(None, ApiOperation::Evaluate, None, None)
        .is_err());

    let agent_token = h.warden.issue_token(Role::Agent, None, None);
    assert!(h
        .warden
        .authorize(
            Some(&agent_token.token),
            ApiOperation::Evaluate,
            None,
            None
        )
        .is_ok());
    assert!(h
        .warden
        .authorize(
            Some(&agent_token.token),
            ApiOperation::ManageApprovals,
            None,
            None
        )
        .is_err());

    let admin_token = h.warden.issue_token(Role::Admin, None, None);
    assert!(h
        .warden
        .authorize(
            Some(&admin_token.token),
            ApiOperation::KillSwitch,
            None,
            None
        )
        .is_ok());

    h.warden.shutdown();
}

#[test]
fn invalid_requests_are_validation_errors() {
    let h = harness(WardenConfig::default(), &[]);

    let mut no_agent = request("", "", ActionType::ToolCall, "x");
    no_agent.agent_id = String::new();
    assert!(matches!(
        h.warden.evaluate(&no_agent),
        Err(warden_runtime::Error::Validation(_))
    ));

    let mut bad_params = request("a1", "", ActionType::ToolCall, "x");
    bad_params.action.params = "{not json".to_string();
    assert!(matches!(
        h.warden.evaluate(&bad_params),
        Err(warden_runtime::Error::Validation(_))
    ));

    h.warden.shutdown();
}

#[test]
fn fts_search_reaches_recorded_bodies() {
    let h = harness(WardenConfig::default(), &[]);
    let session = h
        .warden
        .start_session("writer", None, serde_json::Value::Null)
        .unwrap();

    let trace_request = TraceRequest {
        action: request("writer", &session.id, ActionType::LlmChat, "chat"),
        request_body: "summarize the quarterly earnings report".to_string(),
        response_body: "done".to_string(),
        tokens_in: None,
        tokens_out: None,
        latency_ms: 10,
        model: None,
        status: None,
    };
    h.warden.record_trace(&trace_request).unwrap();
    assert!(h.warden.drain(Duration::from_secs(3)));

    let hits = h.warden.search_traces("quarterly", 10).unwrap();
    assert_eq!(hits.len(), 1);

    let listed = h
        .warden
        .list_traces(&TraceFilter {
            session_id: Some(session.id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(listed.len(), 1);

    h.warden.shutdown();
}
