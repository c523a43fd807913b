//! Metrics collection for a run
//!
//! User flows never touch shared counters. Each flow builds a [`FlowOutcome`]; after a batch
//! joins, the orchestrator folds every outcome into the [`MetricsCollector`]. That fold is the
//! single aggregation point, so no locking is needed here.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use stampede_core::metrics::{percentile_of_sorted, success_rate};
use stampede_core::telemetry::{STEP_LATENCY, STEP_REQUESTS};
use stampede_core::{
    EndpointMetrics, ErrorFrequency, ErrorMetrics, LatencyMetrics, Metrics, RequestMetrics,
    TestError, ThroughputMetrics, WebSocketMetrics,
};

/// How many distinct messages `most_common` keeps.
pub const MOST_COMMON_ERRORS: usize = 10;

/// One executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub endpoint: String,
    pub kind: &'static str,
    pub latency_ms: f64,
    pub success: bool,
    pub bytes: u64,
}

/// WebSocket counters accumulated by a flow or by the connection pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WsTally {
    pub connections: u64,
    pub connection_errors: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Round-trip latency of each answered message.
    pub latencies: Vec<f64>,
    pub closed: u64,
    pub reconnects: u64,
}

impl WsTally {
    pub fn merge(&mut self, other: WsTally) {
        self.connections += other.connections;
        self.connection_errors += other.connection_errors;
        self.messages_sent += other.messages_sent;
        self.messages_received += other.messages_received;
        self.latencies.extend(other.latencies);
        self.closed += other.closed;
        self.reconnects += other.reconnects;
    }
}

/// Everything one simulated user observed.
///
/// Every entry in `errors` has a matching failed entry in `records`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowOutcome {
    pub records: Vec<StepRecord>,
    pub errors: Vec<TestError>,
    pub ws: WsTally,
}

impl FlowOutcome {
    pub fn success(&mut self, endpoint: &str, kind: &'static str, latency_ms: f64, bytes: u64) {
        observe(kind, "success", latency_ms);
        self.records.push(StepRecord {
            endpoint: endpoint.to_string(),
            kind,
            latency_ms,
            success: true,
            bytes,
        });
    }

    /// Records a failed step and its ledger entry together.
    pub fn failure(&mut self, kind: &'static str, latency_ms: f64, error: TestError) {
        observe(kind, "failure", latency_ms);
        let endpoint = error.endpoint.clone().unwrap_or_else(|| kind.to_string());
        self.records.push(StepRecord {
            endpoint,
            kind,
            latency_ms,
            success: false,
            bytes: 0,
        });
        self.errors.push(error);
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn observe(kind: &str, outcome: &str, latency_ms: f64) {
    STEP_REQUESTS.with_label_values(&[kind, outcome]).inc();
    STEP_LATENCY
        .with_label_values(&[kind])
        .observe(latency_ms / 1000.0);
}

#[derive(Debug, Default)]
struct EndpointAccumulator {
    count: u64,
    successful: u64,
    failed: u64,
    mean: f64,
    min: f64,
    max: f64,
    samples: Vec<f64>,
}

impl EndpointAccumulator {
    fn record(&mut self, latency_ms: f64, success: bool) {
        self.count += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        // Incremental mean
        self.mean += (latency_ms - self.mean) / self.count as f64;
        if self.count == 1 {
            self.min = latency_ms;
            self.max = latency_ms;
        } else {
            self.min = self.min.min(latency_ms);
            self.max = self.max.max(latency_ms);
        }
        self.samples.push(latency_ms);
    }

    fn snapshot(&self) -> EndpointMetrics {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        EndpointMetrics {
            count: self.count,
            successful: self.successful,
            failed: self.failed,
            success_rate: success_rate(self.successful, self.count),
            average_latency: self.mean,
            min_latency: self.min,
            max_latency: self.max,
            p95_latency: percentile_of_sorted(&sorted, 0.95),
            p99_latency: percentile_of_sorted(&sorted, 0.99),
        }
    }
}

/// Aggregates flow outcomes into a [`Metrics`] snapshot.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    successful: u64,
    failed: u64,
    bytes: u64,
    latencies: Vec<f64>,
    endpoints: BTreeMap<String, EndpointAccumulator>,
    errors: Vec<TestError>,
    ws: WsTally,
    ws_active: u64,
    ws_latency_mean: f64,
    ws_latency_count: u64,
    custom: BTreeMap<String, f64>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one flow's observations into the aggregate.
    pub fn absorb(&mut self, outcome: FlowOutcome) {
        for record in outcome.records {
            if record.success {
                self.successful += 1;
            } else {
                self.failed += 1;
            }
            self.bytes += record.bytes;
            self.latencies.push(record.latency_ms);
            self.endpoints
                .entry(record.endpoint)
                .or_default()
                .record(record.latency_ms, record.success);
        }
        self.errors.extend(outcome.errors);

        for latency in &outcome.ws.latencies {
            self.ws_latency_count += 1;
            self.ws_latency_mean += (latency - self.ws_latency_mean) / self.ws_latency_count as f64;
        }
        self.ws.merge(outcome.ws);
    }

    /// Open WebSocket connections right now, as reported by the driver.
    pub fn set_active_connections(&mut self, active: u64) {
        self.ws_active = active;
    }

    pub fn set_custom(&mut self, key: impl Into<String>, value: f64) {
        self.custom.insert(key.into(), value);
    }

    pub fn total_requests(&self) -> u64 {
        self.successful + self.failed
    }

    /// The error ledger in arrival order.
    pub fn errors(&self) -> &[TestError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<TestError> {
        self.errors
    }

    /// Derived metrics as of `elapsed` run time.
    #[must_use]
    pub fn snapshot(&self, elapsed: Duration) -> Metrics {
        let mut requests = RequestMetrics::from_counts(self.successful, self.failed);
        requests.by_endpoint = self
            .endpoints
            .iter()
            .map(|(endpoint, acc)| (endpoint.clone(), acc.snapshot()))
            .collect();

        let seconds = elapsed.as_secs_f64();
        let throughput = if seconds > 0.0 {
            ThroughputMetrics {
                requests_per_second: requests.total as f64 / seconds,
                bytes_per_second: self.bytes as f64 / seconds,
            }
        } else {
            ThroughputMetrics::default()
        };

        Metrics {
            requests,
            latency: LatencyMetrics::from_samples(&self.latencies),
            throughput,
            errors: self.error_metrics(),
            websockets: WebSocketMetrics {
                connections: self.ws.connections,
                active_connections: self.ws_active,
                messages_sent: self.ws.messages_sent,
                messages_received: self.ws.messages_received,
                connection_errors: self.ws.connection_errors,
                reconnects: self.ws.reconnects,
                avg_message_latency: self.ws_latency_mean,
            },
            custom: self.custom.clone(),
        }
    }

    fn error_metrics(&self) -> ErrorMetrics {
        let mut by_type = BTreeMap::new();
        let mut by_endpoint = BTreeMap::new();
        let mut by_message: HashMap<&str, u64> = HashMap::new();

        for error in &self.errors {
            *by_type.entry(error.error_type.as_str().to_string()).or_insert(0) += 1;
            if let Some(endpoint) = &error.endpoint {
                *by_endpoint.entry(endpoint.clone()).or_insert(0) += 1;
            }
            *by_message.entry(error.message.as_str()).or_insert(0) += 1;
        }

        let mut most_common: Vec<ErrorFrequency> = by_message
            .into_iter()
            .map(|(message, count)| ErrorFrequency {
                message: message.to_string(),
                count,
            })
            .collect();
        most_common.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
        most_common.truncate(MOST_COMMON_ERRORS);

        ErrorMetrics {
            total: self.errors.len() as u64,
            by_type,
            by_endpoint,
            most_common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::ErrorType;

    fn outcome(endpoint: &str, latencies: &[f64], failures: usize) -> FlowOutcome {
        let mut outcome = FlowOutcome::default();
        for latency in latencies {
            outcome.success(endpoint, "http", *latency, 10);
        }
        for _ in 0..failures {
            outcome.failure(
                "http",
                1.0,
                TestError::new(ErrorType::Network, "connection refused").with_endpoint(endpoint),
            );
        }
        outcome
    }

    #[test]
    fn test_counts_and_ledger_stay_consistent() {
        let mut collector = MetricsCollector::new();
        collector.absorb(outcome("/a", &[10.0, 20.0], 1));
        collector.absorb(outcome("/b", &[30.0], 2));

        let metrics = collector.snapshot(Duration::from_secs(2));
        assert_eq!(metrics.requests.total, 6);
        assert_eq!(
            metrics.requests.total,
            metrics.requests.successful + metrics.requests.failed
        );
        assert_eq!(metrics.errors.total, metrics.requests.failed);
        assert_eq!(metrics.errors.count_of(ErrorType::Network), 3);
        assert_eq!(metrics.errors.by_endpoint["/b"], 2);
        assert_eq!(metrics.throughput.requests_per_second, 3.0);
        assert_eq!(metrics.errors.most_common[0].count, 3);
    }

    #[test]
    fn test_endpoint_stats_use_raw_samples() {
        let mut collector = MetricsCollector::new();
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        collector.absorb(outcome("/items", &samples, 0));

        let metrics = collector.snapshot(Duration::from_secs(1));
        let endpoint = &metrics.requests.by_endpoint["/items"];
        assert_eq!(endpoint.count, 100);
        assert!((endpoint.average_latency - 50.5).abs() < 1e-9);
        assert_eq!(endpoint.min_latency, 1.0);
        assert_eq!(endpoint.max_latency, 100.0);
        assert_eq!(endpoint.p95_latency, 96.0);
        assert_eq!(metrics.latency.p99, 100.0);
    }

    #[test]
    fn test_websocket_latency_is_running_mean() {
        let mut collector = MetricsCollector::new();
        let mut first = FlowOutcome::default();
        first.ws.messages_sent = 2;
        first.ws.messages_received = 2;
        first.ws.latencies = vec![10.0, 20.0];
        let mut second = FlowOutcome::default();
        second.ws.messages_sent = 1;
        second.ws.messages_received = 1;
        second.ws.latencies = vec![60.0];

        collector.absorb(first);
        collector.absorb(second);
        collector.set_active_connections(4);

        let ws = collector.snapshot(Duration::from_secs(1)).websockets;
        assert_eq!(ws.messages_sent, 3);
        assert_eq!(ws.active_connections, 4);
        assert!((ws.avg_message_latency - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_run_has_zero_throughput() {
        let metrics = MetricsCollector::new().snapshot(Duration::ZERO);
        assert_eq!(metrics.requests.total, 0);
        assert_eq!(metrics.throughput.requests_per_second, 0.0);
        assert_eq!(metrics.requests.success_rate, 0.0);
    }
}
