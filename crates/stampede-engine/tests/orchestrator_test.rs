//! End-to-end runs over the deterministic fake transports.

use std::sync::Arc;

use serde_json::json;
use stampede_core::{
    CoreError, Environment, ErrorType, HttpStep, Overall, Scenario, StampedeConfig, Step,
    TestConfig, Termination, WebSocketStep,
};
use stampede_engine::transport::fake::{FakeHttpTransport, FakeWsConnector, InjectedFailure};
use stampede_engine::{FunctionRegistry, LoadTestOrchestrator, StaticMonitor};
use stampede_policy::{ExecutionPolicy, PolicyAction, PolicyManager};

fn stampede_config(batch_size: usize, policy: Option<&str>) -> StampedeConfig {
    let mut config = StampedeConfig::default();
    config.executor.batch_size = batch_size;
    config.executor.batch_delay_ms = 0;
    config.executor.default_timeout_ms = 1_000;
    config.websocket.response_timeout_ms = 50;
    config.websocket.wait_for_timeout_ms = 50;
    config.websocket.probe_delay_ms = 0;
    config.monitoring.policy = policy.map(str::to_string);
    config.monitoring.sample_resources = false;
    config.monitoring.pause_poll_interval_ms = 5;
    config
}

fn scenario(name: &str, weight: f64, flow: Vec<Step>) -> Scenario {
    Scenario {
        name: name.to_string(),
        weight,
        flow,
    }
}

fn test_config(max_users: u32, scenarios: Vec<Scenario>) -> TestConfig {
    TestConfig {
        name: "checkout".to_string(),
        description: "checkout flow".to_string(),
        environment: Environment::Development,
        max_users,
        duration: 60,
        scenarios,
        base_url: Some("http://shop.local".to_string()),
        websocket_url: None,
    }
}

fn orchestrator(
    config: StampedeConfig,
    http: Arc<FakeHttpTransport>,
    ws: FakeWsConnector,
) -> LoadTestOrchestrator {
    LoadTestOrchestrator::new(config, http, Arc::new(ws), FunctionRegistry::new())
}

#[tokio::test]
async fn test_clean_run_scores_pass() {
    let http = Arc::new(FakeHttpTransport::new().route("/products", 200, "[]"));
    let orchestrator = orchestrator(stampede_config(5, None), http.clone(), FakeWsConnector::new());
    let test = test_config(
        12,
        vec![scenario(
            "browse",
            1.0,
            vec![
                Step::http(HttpStep::get("/")),
                Step::http(HttpStep::get("/products")),
            ],
        )],
    );

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    let requests = &results.metrics.requests;
    assert_eq!(requests.total, 24);
    assert_eq!(requests.total, requests.successful + requests.failed);
    assert_eq!(requests.success_rate, 100.0);
    assert_eq!(http.call_count(), 24);
    assert_eq!(results.termination, Termination::Completed);
    assert_eq!(results.summary.overall, Overall::Pass);
    assert_eq!(results.summary.score, 100.0);
    assert!(results.metrics.requests.by_endpoint.contains_key("http://shop.local/products"));
    assert!(results.warnings.is_empty());
}

#[tokio::test]
async fn test_structural_errors_abort_before_traffic() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(stampede_config(5, None), http.clone(), FakeWsConnector::new());
    let test = test_config(0, Vec::new());

    let err = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap_err();
    match err {
        CoreError::InvalidConfig { errors } => assert_eq!(errors.len(), 2),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
    assert_eq!(http.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_monitoring_policy_is_fatal() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(
        stampede_config(5, Some("missing")),
        http.clone(),
        FakeWsConnector::new(),
    );
    let test = test_config(5, vec![scenario("a", 1.0, vec![Step::http(HttpStep::get("/"))])]);

    let err = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(http.call_count(), 0);
}

#[tokio::test]
async fn test_failures_are_recorded_not_raised() {
    let http = Arc::new(
        FakeHttpTransport::new()
            .fail("/flaky", InjectedFailure::Network)
            .route("/broken", 500, "oops"),
    );
    let orchestrator = orchestrator(stampede_config(10, None), http, FakeWsConnector::new());
    let test = test_config(
        10,
        vec![
            scenario("flaky", 1.0, vec![Step::http(HttpStep::get("/flaky"))]),
            scenario("broken", 1.0, vec![Step::http(HttpStep::get("/broken"))]),
        ],
    );

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    assert_eq!(results.metrics.requests.failed, 10);
    assert_eq!(results.metrics.errors.total, results.metrics.requests.failed);
    assert_eq!(results.errors.len(), 10);
    assert_eq!(results.metrics.errors.count_of(ErrorType::Network), 10);
    assert_eq!(results.summary.overall, Overall::Fail);
    assert!(!results.summary.recommendations.is_empty());
}

#[tokio::test]
async fn test_weighted_allocation_drops_remainder() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(stampede_config(50, None), http.clone(), FakeWsConnector::new());
    let test = test_config(
        10,
        vec![
            scenario("heavy", 2.0, vec![Step::http(HttpStep::get("/heavy"))]),
            scenario("light", 1.0, vec![Step::http(HttpStep::get("/light"))]),
            scenario("rare", 0.01, vec![Step::http(HttpStep::get("/rare"))]),
        ],
    );

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    let endpoints = &results.metrics.requests.by_endpoint;
    assert_eq!(endpoints["http://shop.local/heavy"].count, 6);
    assert_eq!(endpoints["http://shop.local/light"].count, 3);
    assert!(!endpoints.contains_key("http://shop.local/rare"));
    assert!(results.metrics.requests.total <= u64::from(test.max_users));
    assert!(results.warnings.iter().any(|w| w.contains("'rare'")));
}

#[tokio::test]
async fn test_circuit_breaker_stops_at_batch_boundary() {
    let http = Arc::new(FakeHttpTransport::new().fail("/", InjectedFailure::Network));
    let orchestrator = orchestrator(
        stampede_config(10, Some("development")),
        http.clone(),
        FakeWsConnector::new(),
    );
    let test = test_config(50, vec![scenario("a", 1.0, vec![Step::http(HttpStep::get("/"))])]);

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    // The first batch finishes, nothing after it starts
    assert_eq!(http.call_count(), 10);
    assert_eq!(results.termination, Termination::StoppedByPolicy);
    assert_ne!(results.summary.overall, Overall::Pass);
    assert!(results
        .warnings
        .iter()
        .any(|w| w.starts_with("Stopped by policy 'development'")));
}

#[tokio::test]
async fn test_policy_stop_caps_overall_at_warning() {
    let http = Arc::new(FakeHttpTransport::new());
    let mut config = stampede_config(5, Some("development"));
    config.monitoring.sample_resources = true;
    let orchestrator = LoadTestOrchestrator::new(
        config,
        http,
        Arc::new(FakeWsConnector::new()),
        FunctionRegistry::new(),
    )
    .with_resource_monitor(Arc::new(StaticMonitor::new(20.0, 30.0)));

    let mut policies = PolicyManager::new();
    let mut policy = policies.get_policy("development").unwrap().clone();
    policy.actions.on_resource_exhaustion = stampede_policy::PolicyAction::Stop;
    policy.rules.resources.max_cpu_percent = 10.0;
    policies.update_policy("development", policy).unwrap();

    let test = test_config(10, vec![scenario("a", 1.0, vec![Step::http(HttpStep::get("/"))])]);
    let results = orchestrator.run_test(&test, &mut policies).await.unwrap();

    assert_eq!(results.termination, Termination::StoppedByPolicy);
    assert_eq!(results.metrics.requests.total, 5);
    assert_eq!(results.metrics.requests.success_rate, 100.0);
    assert_eq!(results.summary.overall, Overall::Warning);
    assert_eq!(results.metrics.custom_gauge("cpu_usage"), Some(20.0));
}

#[tokio::test]
async fn test_pause_that_never_clears_times_out() {
    let http = Arc::new(FakeHttpTransport::new());
    let mut config = stampede_config(5, Some("development"));
    config.monitoring.sample_resources = true;
    config.monitoring.pause_timeout_secs = 0;
    let orchestrator = LoadTestOrchestrator::new(
        config,
        http.clone(),
        Arc::new(FakeWsConnector::new()),
        FunctionRegistry::new(),
    )
    // development pauses on resource exhaustion above 90% CPU
    .with_resource_monitor(Arc::new(StaticMonitor::new(99.0, 10.0)));

    let test = test_config(20, vec![scenario("a", 1.0, vec![Step::http(HttpStep::get("/"))])]);
    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    assert_eq!(results.termination, Termination::PauseTimeout);
    assert_eq!(http.call_count(), 5);
    assert!(results.warnings.iter().any(|w| w.starts_with("Paused by policy")));
    assert!(results.warnings.iter().any(|w| w.starts_with("Pause exceeded")));
}

#[tokio::test]
async fn test_latency_pause_cannot_recover_without_traffic() {
    let http = Arc::new(FakeHttpTransport::new().route_with_latency("/", 200, "", 5));
    let mut config = stampede_config(5, Some("latency-gate"));
    config.monitoring.pause_timeout_secs = 0;
    let orchestrator = orchestrator(config, http.clone(), FakeWsConnector::new());

    let mut gate = ExecutionPolicy::development();
    gate.name = "latency-gate".to_string();
    gate.rules.max_response_time_ms = 1.0;
    gate.actions.on_high_latency = PolicyAction::Pause;
    let mut policies = PolicyManager::new();
    policies.add_policy(gate).unwrap();

    let test = test_config(20, vec![scenario("a", 1.0, vec![Step::http(HttpStep::get("/"))])]);
    let results = orchestrator.run_test(&test, &mut policies).await.unwrap();

    assert_eq!(results.termination, Termination::PauseTimeout);
    assert_eq!(http.call_count(), 5);
    assert!(results
        .warnings
        .iter()
        .any(|w| w.starts_with("Paused by policy 'latency-gate'")));
}

#[tokio::test]
async fn test_duration_budget_stops_new_batches() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(stampede_config(5, None), http.clone(), FakeWsConnector::new());
    let mut test = test_config(
        20,
        vec![scenario(
            "slow",
            1.0,
            vec![Step::http(HttpStep::get("/")).with_think(600)],
        )],
    );
    test.duration = 1;

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    assert_eq!(results.termination, Termination::DurationElapsed);
    assert_eq!(http.call_count(), 10);
    assert!(results
        .warnings
        .iter()
        .any(|w| w.starts_with("Duration budget")));
}

#[tokio::test]
async fn test_websocket_scenario_tracks_connections_and_messages() {
    let http = Arc::new(FakeHttpTransport::new());
    let ws = FakeWsConnector::new().with_reply("join", "{\"type\":\"joined\"}");
    let orchestrator = orchestrator(stampede_config(4, None), http, ws);

    let mut test = test_config(
        8,
        vec![scenario(
            "chat",
            1.0,
            vec![
                Step::websocket(WebSocketStep::connect()),
                Step::websocket(WebSocketStep::send(json!({ "type": "join" })).wait_for("joined")),
                Step::websocket(WebSocketStep::send(json!("hello"))),
                Step::websocket(WebSocketStep::close()),
            ],
        )],
    );
    test.websocket_url = Some("ws://chat.local/socket".to_string());

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    let ws = &results.metrics.websockets;
    assert_eq!(ws.connections, 8);
    assert_eq!(ws.connection_errors, 0);
    assert_eq!(ws.messages_sent, 16);
    assert_eq!(ws.messages_received, 16);
    assert_eq!(ws.active_connections, 0);
    assert!(ws.avg_message_latency > 0.0);
    assert!(results.errors.is_empty());
}

#[tokio::test]
async fn test_refused_connections_are_recorded_per_user() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(stampede_config(5, None), http, FakeWsConnector::new().refusing());

    let mut test = test_config(
        5,
        vec![scenario(
            "chat",
            1.0,
            vec![
                Step::websocket(WebSocketStep::connect()),
                Step::websocket(WebSocketStep::send(json!("hi"))),
            ],
        )],
    );
    test.websocket_url = Some("ws://chat.local/socket".to_string());

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    // Pool attempt plus the flow's own connect step, both refused
    let ws = &results.metrics.websockets;
    assert_eq!(ws.connections, 0);
    assert_eq!(ws.connection_errors, 10);
    assert_eq!(ws.messages_sent, 0);
    assert_eq!(results.metrics.errors.count_of(ErrorType::Websocket), 10);
    assert_eq!(results.metrics.errors.total, results.metrics.requests.failed);
}

#[tokio::test]
async fn test_probe_runs_when_no_scenario_uses_websockets() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(stampede_config(3, None), http, FakeWsConnector::new());

    let mut test = test_config(6, vec![scenario("home", 1.0, vec![Step::http(HttpStep::get("/"))])]);
    test.websocket_url = Some("ws://shop.local/live".to_string());

    let results = orchestrator
        .run_test(&test, &mut PolicyManager::new())
        .await
        .unwrap();

    let probes = stampede_engine::websocket::probe_messages().len() as u64;
    let ws = &results.metrics.websockets;
    assert_eq!(ws.connections, 6);
    assert_eq!(ws.messages_sent, 6 * probes);
    assert_eq!(ws.messages_received, 6 * probes);
    assert_eq!(ws.active_connections, 0);
}

#[tokio::test]
async fn test_each_run_gets_a_fresh_id() {
    let http = Arc::new(FakeHttpTransport::new());
    let orchestrator = orchestrator(stampede_config(5, None), http, FakeWsConnector::new());
    let test = test_config(2, vec![scenario("a", 1.0, vec![Step::http(HttpStep::get("/"))])]);
    let mut policies = PolicyManager::new();

    let first = orchestrator.run_test(&test, &mut policies).await.unwrap();
    let second = orchestrator.run_test(&test, &mut policies).await.unwrap();
    assert_ne!(first.test_id, second.test_id);
    assert_eq!(first.metrics.requests.total, second.metrics.requests.total);
}
