//! Canned remediation advice keyed on observed conditions.

use stampede_core::config::AnalyzerConfig;
use stampede_core::metrics::MEMORY_USAGE;
use stampede_core::Metrics;

use crate::anomaly::{Anomaly, AnomalyType};

/// Throughput under this many requests per second is considered low.
const LOW_THROUGHPUT_RPS: f64 = 10.0;
const HIGH_MEMORY_PERCENT: f64 = 80.0;

/// Recommendations for `metrics` plus anomaly-specific advice, deduplicated in first-seen order.
#[must_use]
pub fn generate_recommendations(
    metrics: &Metrics,
    anomalies: &[Anomaly],
    config: &AnalyzerConfig,
) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.error_rate() > config.error_rate_threshold {
        push_all(
            &mut out,
            &[
                "Investigate the most common errors and fix their root cause",
                "Add retries with exponential backoff for transient failures",
                "Review error handling and input validation on failing endpoints",
            ],
        );
    }

    if metrics.latency.p95 > config.p95_threshold_ms {
        push_all(
            &mut out,
            &[
                "Profile slow endpoints and optimize database queries",
                "Add caching for frequently requested data",
                "Consider connection pooling for downstream services",
            ],
        );
    }

    if metrics.requests.total > 0 && metrics.throughput.requests_per_second < LOW_THROUGHPUT_RPS {
        push_all(
            &mut out,
            &[
                "Scale the service horizontally to increase throughput",
                "Look for blocking operations on the request path",
            ],
        );
    }

    if metrics
        .custom_gauge(MEMORY_USAGE)
        .is_some_and(|memory| memory > HIGH_MEMORY_PERCENT)
    {
        push_all(
            &mut out,
            &[
                "Check for memory leaks under sustained load",
                "Reduce per-request memory allocations",
            ],
        );
    }

    for anomaly in anomalies {
        let advice: &[&str] = match anomaly.kind {
            AnomalyType::ErrorRate => &["Set up alerting on error rate so regressions are caught early"],
            AnomalyType::LatencyP95 | AnomalyType::LatencyP99 => {
                &["Investigate tail latency: GC pauses, lock contention and cold caches"]
            }
            AnomalyType::ThroughputDrop => {
                &["Compare recent deployments against the previous run to find the regression"]
            }
            AnomalyType::EndpointErrorRate => &["Review logs of the failing endpoint"],
            AnomalyType::EndpointLatency => &["Optimize the slow endpoint or cache its responses"],
        };
        push_all(&mut out, advice);
    }

    out
}

fn push_all(out: &mut Vec<String>, items: &[&str]) {
    for item in items {
        if !out.iter().any(|existing| existing == item) {
            out.push((*item).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{RequestMetrics, Severity};

    #[test]
    fn test_recommendations_are_deduplicated() {
        let config = AnalyzerConfig::default();
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(50, 50);
        metrics.errors.total = 50;
        metrics.throughput.requests_per_second = 100.0;

        let anomaly = Anomaly {
            kind: AnomalyType::EndpointErrorRate,
            severity: Severity::High,
            current_value: 50.0,
            threshold: 90.0,
            description: String::new(),
            impact: String::new(),
            endpoint: Some("/a".to_string()),
        };
        let anomalies = vec![anomaly.clone(), anomaly];

        let recs = generate_recommendations(&metrics, &anomalies, &config);
        let endpoint_recs = recs
            .iter()
            .filter(|r| r.as_str() == "Review logs of the failing endpoint")
            .count();
        assert_eq!(endpoint_recs, 1);
        assert!(recs[0].contains("most common errors"));
    }

    #[test]
    fn test_healthy_run_gets_no_advice() {
        let config = AnalyzerConfig::default();
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(1000, 0);
        metrics.throughput.requests_per_second = 250.0;
        assert!(generate_recommendations(&metrics, &[], &config).is_empty());
    }
}
