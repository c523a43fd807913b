//! Self-telemetry for the load generator
//!
//! Prometheus metrics describing what stampede itself is doing, registered lazily on first
//! access using once_cell::Lazy. These are distinct from the [`crate::Metrics`] model that
//! describes the system under test.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

/// Steps executed by kind (http, websocket, function) and outcome (success, failure)
pub static STEP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_step_requests_total",
        "Total number of flow steps executed",
        &["kind", "outcome"]
    )
    .expect("Failed to register step request counter")
});

/// Step latency histogram
pub static STEP_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "stampede_step_latency_seconds",
        "Flow step latency in seconds",
        &["kind"],
        // Buckets: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register step latency histogram")
});

/// Policy violations raised during validation and live monitoring
pub static POLICY_VIOLATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_policy_violations_total",
        "Total number of policy violations",
        &["policy", "kind"]
    )
    .expect("Failed to register policy violation counter")
});

/// Currently open WebSocket connections held by the driver
pub static WS_ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "stampede_websocket_active_connections",
        "Number of open WebSocket connections"
    )
    .expect("Failed to register websocket connection gauge")
});

/// Completed runs by overall verdict
pub static TEST_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_test_runs_total",
        "Total number of completed load test runs",
        &["overall"]
    )
    .expect("Failed to register test run counter")
});

/// Sessions currently persisted
pub static SESSIONS_STORED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("stampede_sessions_stored", "Number of stored sessions")
        .expect("Failed to register sessions gauge")
});

/// Renders every registered metric in the Prometheus text exposition format.
pub fn render() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("Failed to encode telemetry: {}", err);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
