//! Bottleneck identification and capacity analysis.

use serde::{Deserialize, Serialize};
use stampede_core::metrics::{CPU_USAGE, MEMORY_USAGE};
use stampede_core::{Bottleneck, BottleneckType, ErrorType, Metrics, Severity, TestResults};

const CPU_HIGH: f64 = 80.0;
const MEMORY_HIGH: f64 = 85.0;
const RESOURCE_CRITICAL: f64 = 95.0;
const SLOW_RESPONSE_MS: f64 = 1_000.0;
const VERY_SLOW_RESPONSE_MS: f64 = 3_000.0;
const ERROR_RATE_FOR_ATTRIBUTION: f64 = 5.0;

/// Default ceilings reported when no measurement exists.
const DEFAULT_DATABASE_CONNECTIONS: u32 = 100;
const DEFAULT_MEMORY_LIMIT_MB: u64 = 2_048;
const DEFAULT_CPU_CORES: u32 = 4;

/// Bottlenecks evidenced by `metrics`, most severe first.
#[must_use]
pub fn identify_bottlenecks(metrics: &Metrics) -> Vec<Bottleneck> {
    let mut found = Vec::new();

    if let Some(cpu) = metrics.custom_gauge(CPU_USAGE) {
        if cpu >= CPU_HIGH {
            found.push(Bottleneck {
                kind: BottleneckType::Cpu,
                severity: resource_severity(cpu),
                description: format!("CPU usage at {cpu:.1}%"),
                impact: "Request processing is CPU bound; latency rises with load".to_string(),
                recommendation: "Scale out horizontally or profile hot code paths".to_string(),
            });
        }
    }

    if let Some(memory) = metrics.custom_gauge(MEMORY_USAGE) {
        if memory >= MEMORY_HIGH {
            found.push(Bottleneck {
                kind: BottleneckType::Memory,
                severity: resource_severity(memory),
                description: format!("Memory usage at {memory:.1}%"),
                impact: "Risk of swapping, GC pauses or out-of-memory failures".to_string(),
                recommendation: "Check for leaks and reduce per-request allocations".to_string(),
            });
        }
    }

    let average = metrics.latency.average;
    if average > SLOW_RESPONSE_MS {
        found.push(Bottleneck {
            kind: BottleneckType::Database,
            severity: if average >= VERY_SLOW_RESPONSE_MS {
                Severity::Critical
            } else {
                Severity::High
            },
            description: format!("Average response time {average:.0}ms"),
            impact: "Slow responses usually point at queries or lock contention in storage"
                .to_string(),
            recommendation: "Add indexes, cache hot reads and review slow query logs".to_string(),
        });
    }

    let error_rate = metrics.error_rate();
    if error_rate > ERROR_RATE_FOR_ATTRIBUTION && metrics.errors.total > 0 {
        let network = metrics.errors.count_of(ErrorType::Network);
        if network * 2 >= metrics.errors.total {
            found.push(Bottleneck {
                kind: BottleneckType::Network,
                severity: Severity::High,
                description: format!(
                    "{network} of {} errors are network failures",
                    metrics.errors.total
                ),
                impact: "Connections are refused or dropped under load".to_string(),
                recommendation: "Raise connection limits and check load balancer capacity"
                    .to_string(),
            });
        }

        let timeouts = metrics.errors.count_of(ErrorType::Timeout);
        if timeouts > 0 {
            found.push(Bottleneck {
                kind: BottleneckType::External,
                severity: Severity::Medium,
                description: format!("{timeouts} requests timed out"),
                impact: "A downstream dependency is not keeping up".to_string(),
                recommendation: "Add timeouts, retries with backoff and circuit breakers for \
                                 downstream calls"
                    .to_string(),
            });
        }
    }

    found.sort_by(|a, b| b.severity.cmp(&a.severity));
    found
}

fn resource_severity(percent: f64) -> Severity {
    if percent >= RESOURCE_CRITICAL {
        Severity::Critical
    } else {
        Severity::High
    }
}

/// Estimated ceilings derived from one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityLimits {
    pub max_requests_per_second: f64,
    pub max_concurrent_users: u32,
    pub database_connections: u32,
    pub memory_limit_mb: u64,
    pub cpu_cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckAnalysis {
    pub bottlenecks: Vec<Bottleneck>,
    pub optimization_strategies: Vec<String>,
    pub scaling_recommendations: Vec<String>,
    pub capacity_limits: CapacityLimits,
}

#[must_use]
pub fn analyze_bottlenecks(results: &TestResults) -> BottleneckAnalysis {
    let bottlenecks = identify_bottlenecks(&results.metrics);

    let optimization_strategies = [
        "Cache frequently read, rarely changed data",
        "Pool and reuse database and HTTP connections",
        "Move slow work to background queues",
        "Compress large responses",
        "Paginate list endpoints",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let scaling_recommendations = [
        "Scale stateless services horizontally behind a load balancer",
        "Add read replicas for read-heavy workloads",
        "Autoscale on CPU and request latency",
        "Serve static assets from a CDN",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let capacity_limits = CapacityLimits {
        max_requests_per_second: results.metrics.throughput.requests_per_second * 1.5,
        max_concurrent_users: (f64::from(results.config.max_users) * 1.2).round() as u32,
        database_connections: DEFAULT_DATABASE_CONNECTIONS,
        memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        cpu_cores: DEFAULT_CPU_CORES,
    };

    BottleneckAnalysis {
        bottlenecks,
        optimization_strategies,
        scaling_recommendations,
        capacity_limits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::RequestMetrics;

    #[test]
    fn test_healthy_run_has_no_bottlenecks() {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(100, 0);
        metrics.latency.average = 120.0;
        assert!(identify_bottlenecks(&metrics).is_empty());
    }

    #[test]
    fn test_resource_and_latency_bottlenecks() {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(100, 0);
        metrics.latency.average = 3_500.0;
        metrics.custom.insert(CPU_USAGE.to_string(), 85.0);
        metrics.custom.insert(MEMORY_USAGE.to_string(), 97.0);

        let found = identify_bottlenecks(&metrics);
        let kinds: Vec<_> = found.iter().map(|b| b.kind).collect();
        assert!(kinds.contains(&BottleneckType::Cpu));
        assert!(kinds.contains(&BottleneckType::Memory));
        assert!(kinds.contains(&BottleneckType::Database));
        // Sorted most severe first
        assert_eq!(found[0].severity, Severity::Critical);
        assert_eq!(found.last().unwrap().kind, BottleneckType::Cpu);
    }

    #[test]
    fn test_error_attribution() {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(80, 20);
        metrics.errors.total = 20;
        metrics.errors.by_type.insert("network".to_string(), 12);
        metrics.errors.by_type.insert("timeout".to_string(), 8);

        let kinds: Vec<_> = identify_bottlenecks(&metrics)
            .into_iter()
            .map(|b| b.kind)
            .collect();
        assert_eq!(kinds, vec![BottleneckType::Network, BottleneckType::External]);
    }
}
