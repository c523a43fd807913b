//! Metrics model shared by every stampede component.
//!
//! These are plain data: the engine's collector builds them during a run, and once embedded in a
//! [`crate::TestResults`] they are read-only. All latencies are milliseconds.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Custom gauge key for host CPU utilisation in percent.
pub const CPU_USAGE: &str = "cpu_usage";

/// Custom gauge key for host memory utilisation in percent.
pub const MEMORY_USAGE: &str = "memory_usage";

/// Aggregate metrics for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub requests: RequestMetrics,
    pub latency: LatencyMetrics,
    pub throughput: ThroughputMetrics,
    pub errors: ErrorMetrics,
    pub websockets: WebSocketMetrics,

    /// Free-form numeric gauges supplied by monitoring (e.g. [`CPU_USAGE`]).
    #[serde(default)]
    pub custom: BTreeMap<String, f64>,
}

impl Metrics {
    /// Errors per request in percent; 0 when nothing was sent.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.requests.total == 0 {
            return 0.0;
        }
        self.errors.total as f64 / self.requests.total as f64 * 100.0
    }

    #[must_use]
    pub fn custom_gauge(&self, key: &str) -> Option<f64> {
        self.custom.get(key).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// `successful / total * 100`, 0 when `total == 0`.
    pub success_rate: f64,
    #[serde(default)]
    pub by_endpoint: BTreeMap<String, EndpointMetrics>,
}

impl RequestMetrics {
    /// Builds request counters keeping `total == successful + failed`.
    #[must_use]
    pub fn from_counts(successful: u64, failed: u64) -> Self {
        let total = successful + failed;
        Self {
            total,
            successful,
            failed,
            success_rate: success_rate(successful, total),
            by_endpoint: BTreeMap::new(),
        }
    }
}

/// Percentage of successful requests, 0 for an empty run.
#[must_use]
pub fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}

/// Per-endpoint statistics, keyed by URL (or step kind when there is no URL).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub count: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub average: f64,
    pub median: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencyMetrics {
    /// Summarises a raw latency sample set.
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let sum: f64 = sorted.iter().sum();
        let p50 = percentile_of_sorted(&sorted, 0.50);
        Self {
            average: sum / sorted.len() as f64,
            median: p50,
            p50,
            p95: percentile_of_sorted(&sorted, 0.95),
            p99: percentile_of_sorted(&sorted, 0.99),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Nearest-rank percentile over an ascending sample set (`p` in 0.0-1.0).
#[must_use]
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let index = ((sorted.len() as f64) * p) as usize;
    let index = index.min(sorted.len() - 1);
    sorted[index]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub requests_per_second: f64,
    pub bytes_per_second: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total: u64,
    #[serde(default)]
    pub by_type: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_endpoint: BTreeMap<String, u64>,
    /// Most frequent error messages, highest count first.
    #[serde(default)]
    pub most_common: Vec<ErrorFrequency>,
}

impl ErrorMetrics {
    #[must_use]
    pub fn count_of(&self, error_type: ErrorType) -> u64 {
        self.by_type.get(error_type.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMetrics {
    /// Connections successfully established over the run.
    pub connections: u64,
    /// Connections still open when the snapshot was taken.
    pub active_connections: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connection_errors: u64,
    pub reconnects: u64,
    /// Running mean of message round-trip latency.
    pub avg_message_latency: f64,
}

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Network,
    Validation,
    Timeout,
    Websocket,
    Custom,
}

impl ErrorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Websocket => "websocket",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only error ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl TestError {
    #[must_use]
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            error_type,
            message: message.into(),
            endpoint: None,
            status_code: None,
            response_time: None,
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn with_response_time(mut self, millis: f64) -> Self {
        self.response_time = Some(millis);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}
