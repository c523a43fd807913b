//! Threshold-based anomaly detection over a single run.

use serde::{Deserialize, Serialize};
use stampede_core::config::AnalyzerConfig;
use stampede_core::{Metrics, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    ErrorRate,
    LatencyP95,
    LatencyP99,
    ThroughputDrop,
    EndpointErrorRate,
    EndpointLatency,
}

impl AnomalyType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "error_rate",
            Self::LatencyP95 => "latency_p95",
            Self::LatencyP99 => "latency_p99",
            Self::ThroughputDrop => "throughput_drop",
            Self::EndpointErrorRate => "endpoint_error_rate",
            Self::EndpointLatency => "endpoint_latency",
        }
    }
}

/// A metric value that crossed its configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyType,
    pub severity: Severity,
    pub current_value: f64,
    pub threshold: f64,
    pub description: String,
    pub impact: String,
    /// Endpoint the anomaly was found on, for per-endpoint checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// `critical` once `value` is past twice the threshold, `high` otherwise.
fn severity_above(value: f64, threshold: f64) -> Severity {
    if value > threshold * 2.0 {
        Severity::Critical
    } else {
        Severity::High
    }
}

pub fn detect_error_rate(metrics: &Metrics, config: &AnalyzerConfig) -> Option<Anomaly> {
    let rate = metrics.error_rate();
    if rate <= config.error_rate_threshold {
        return None;
    }

    Some(Anomaly {
        kind: AnomalyType::ErrorRate,
        severity: severity_above(rate, config.error_rate_threshold),
        current_value: rate,
        threshold: config.error_rate_threshold,
        description: format!(
            "Error rate {:.2}% exceeds threshold of {:.2}%",
            rate, config.error_rate_threshold
        ),
        impact: format!(
            "{} of {} requests failed; users are seeing errors",
            metrics.errors.total, metrics.requests.total
        ),
        endpoint: None,
    })
}

pub fn detect_latency(metrics: &Metrics, config: &AnalyzerConfig) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if metrics.latency.p95 > config.p95_threshold_ms {
        anomalies.push(Anomaly {
            kind: AnomalyType::LatencyP95,
            severity: severity_above(metrics.latency.p95, config.p95_threshold_ms),
            current_value: metrics.latency.p95,
            threshold: config.p95_threshold_ms,
            description: format!(
                "P95 latency {:.1}ms exceeds threshold of {:.1}ms",
                metrics.latency.p95, config.p95_threshold_ms
            ),
            impact: "5% of requests are slower than acceptable".to_string(),
            endpoint: None,
        });
    }

    if metrics.latency.p99 > config.p99_threshold_ms {
        anomalies.push(Anomaly {
            kind: AnomalyType::LatencyP99,
            severity: severity_above(metrics.latency.p99, config.p99_threshold_ms),
            current_value: metrics.latency.p99,
            threshold: config.p99_threshold_ms,
            description: format!(
                "P99 latency {:.1}ms exceeds threshold of {:.1}ms",
                metrics.latency.p99, config.p99_threshold_ms
            ),
            impact: "Tail latency will be felt by the slowest 1% of users".to_string(),
            endpoint: None,
        });
    }

    anomalies
}

/// Compares throughput against the run immediately before it.
pub fn detect_throughput_drop(
    current: &Metrics,
    previous: &Metrics,
    config: &AnalyzerConfig,
) -> Option<Anomaly> {
    let before = previous.throughput.requests_per_second;
    let now = current.throughput.requests_per_second;
    if before <= 0.0 {
        return None;
    }

    let drop = (before - now) / before * 100.0;
    if drop <= config.throughput_drop_threshold {
        return None;
    }

    Some(Anomaly {
        kind: AnomalyType::ThroughputDrop,
        severity: severity_above(drop, config.throughput_drop_threshold),
        current_value: now,
        threshold: config.throughput_drop_threshold,
        description: format!(
            "Throughput dropped {:.1}% ({:.1} -> {:.1} req/s)",
            drop, before, now
        ),
        impact: "System capacity regressed compared to the previous run".to_string(),
        endpoint: None,
    })
}

pub fn detect_endpoint_anomalies(metrics: &Metrics, config: &AnalyzerConfig) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (endpoint, stats) in &metrics.requests.by_endpoint {
        if stats.count == 0 {
            continue;
        }

        if stats.success_rate < config.endpoint_success_rate_threshold {
            let failure_rate = 100.0 - stats.success_rate;
            let allowed = 100.0 - config.endpoint_success_rate_threshold;
            anomalies.push(Anomaly {
                kind: AnomalyType::EndpointErrorRate,
                severity: severity_above(failure_rate, allowed),
                current_value: stats.success_rate,
                threshold: config.endpoint_success_rate_threshold,
                description: format!(
                    "{endpoint} success rate {:.1}% is below {:.1}%",
                    stats.success_rate, config.endpoint_success_rate_threshold
                ),
                impact: format!("{} of {} calls to {endpoint} failed", stats.failed, stats.count),
                endpoint: Some(endpoint.clone()),
            });
        }

        if stats.average_latency > config.endpoint_latency_threshold_ms {
            anomalies.push(Anomaly {
                kind: AnomalyType::EndpointLatency,
                severity: severity_above(stats.average_latency, config.endpoint_latency_threshold_ms),
                current_value: stats.average_latency,
                threshold: config.endpoint_latency_threshold_ms,
                description: format!(
                    "{endpoint} average latency {:.1}ms exceeds {:.1}ms",
                    stats.average_latency, config.endpoint_latency_threshold_ms
                ),
                impact: format!("Flows calling {endpoint} are slowed down"),
                endpoint: Some(endpoint.clone()),
            });
        }
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{EndpointMetrics, RequestMetrics};

    fn metrics(successful: u64, failed: u64) -> Metrics {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(successful, failed);
        metrics.errors.total = failed;
        metrics
    }

    #[test]
    fn test_error_rate_severity() {
        let config = AnalyzerConfig::default();

        // 20% against a 5% threshold is far past it
        let anomaly = detect_error_rate(&metrics(800, 200), &config).unwrap();
        assert_eq!(anomaly.kind, AnomalyType::ErrorRate);
        assert_eq!(anomaly.severity, Severity::Critical);

        let anomaly = detect_error_rate(&metrics(930, 70), &config).unwrap();
        assert_eq!(anomaly.severity, Severity::High);

        assert!(detect_error_rate(&metrics(990, 10), &config).is_none());
    }

    #[test]
    fn test_latency_thresholds() {
        let config = AnalyzerConfig::default();
        let mut m = metrics(100, 0);
        m.latency.p95 = 1_500.0;
        m.latency.p99 = 5_000.0;

        let anomalies = detect_latency(&m, &config);
        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[1].kind, AnomalyType::LatencyP99);
        assert_eq!(anomalies[1].severity, Severity::Critical);
    }

    #[test]
    fn test_throughput_drop() {
        let config = AnalyzerConfig::default();
        let mut previous = Metrics::default();
        previous.throughput.requests_per_second = 100.0;
        let mut current = Metrics::default();
        current.throughput.requests_per_second = 50.0;

        let anomaly = detect_throughput_drop(&current, &previous, &config).unwrap();
        assert_eq!(anomaly.kind, AnomalyType::ThroughputDrop);
        // 50% drop is more than twice the 20% threshold
        assert_eq!(anomaly.severity, Severity::Critical);

        current.throughput.requests_per_second = 90.0;
        assert!(detect_throughput_drop(&current, &previous, &config).is_none());
    }

    #[test]
    fn test_endpoint_checks() {
        let config = AnalyzerConfig::default();
        let mut m = metrics(0, 0);
        m.requests.by_endpoint.insert(
            "/slow".to_string(),
            EndpointMetrics {
                count: 10,
                successful: 10,
                success_rate: 100.0,
                average_latency: 800.0,
                ..Default::default()
            },
        );
        m.requests.by_endpoint.insert(
            "/flaky".to_string(),
            EndpointMetrics {
                count: 10,
                successful: 5,
                failed: 5,
                success_rate: 50.0,
                average_latency: 20.0,
                ..Default::default()
            },
        );

        let anomalies = detect_endpoint_anomalies(&m, &config);
        assert_eq!(anomalies.len(), 2);
        let flaky = anomalies
            .iter()
            .find(|a| a.kind == AnomalyType::EndpointErrorRate)
            .unwrap();
        assert_eq!(flaky.endpoint.as_deref(), Some("/flaky"));
        assert_eq!(flaky.severity, Severity::Critical);
    }

    #[test]
    fn test_anomaly_type_wire_name() {
        let json = serde_json::to_string(&AnomalyType::ThroughputDrop).unwrap();
        assert_eq!(json, "\"throughput_drop\"");
    }
}
