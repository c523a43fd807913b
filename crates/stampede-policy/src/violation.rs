//! Violations, validation reports and monitoring decisions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampede_core::metrics::{CPU_USAGE, MEMORY_USAGE};
use stampede_core::{Metrics, Severity};

use crate::policy::PolicyAction;

/// Rule a violation was raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    MaxConcurrentUsers,
    MaxTestDuration,
    Environment,
    BlockedEndpoint,
    ErrorRate,
    ResponseTime,
    CpuUsage,
    MemoryUsage,
    RequestRate,
    CircuitBreaker,
    RateLimit,
}

impl ViolationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxConcurrentUsers => "maxConcurrentUsers",
            Self::MaxTestDuration => "maxTestDuration",
            Self::Environment => "environment",
            Self::BlockedEndpoint => "blockedEndpoint",
            Self::ErrorRate => "errorRate",
            Self::ResponseTime => "responseTime",
            Self::CpuUsage => "cpuUsage",
            Self::MemoryUsage => "memoryUsage",
            Self::RequestRate => "requestRate",
            Self::CircuitBreaker => "circuitBreaker",
            Self::RateLimit => "rateLimit",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub current_value: Value,
    pub limit_value: Value,
    pub policy: String,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)
    }
}

/// Outcome of checking a test configuration against a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub violations: Vec<PolicyViolation>,
    pub warnings: Vec<String>,
}

/// An action triggered by one violation during monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredAction {
    pub kind: ViolationKind,
    pub action: PolicyAction,
}

/// Outcome of one live monitoring check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorDecision {
    pub should_stop: bool,
    pub should_pause: bool,
    pub violations: Vec<PolicyViolation>,
    pub actions: Vec<TriggeredAction>,
}

impl MonitorDecision {
    /// Derives stop/pause flags: any stop wins, pause only applies without a stop.
    #[must_use]
    pub fn from_actions(violations: Vec<PolicyViolation>, actions: Vec<TriggeredAction>) -> Self {
        let should_stop = actions.iter().any(|a| a.action == PolicyAction::Stop);
        let should_pause =
            !should_stop && actions.iter().any(|a| a.action == PolicyAction::Pause);
        Self {
            should_stop,
            should_pause,
            violations,
            actions,
        }
    }

    /// One-line description of the violations, for run warnings.
    #[must_use]
    pub fn describe(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Live readings fed to the policy manager at batch boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    /// Percent.
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub requests_per_second: f64,
    pub total_requests: u64,
    /// Percent, when a monitoring source supplies it.
    pub cpu_usage: Option<f64>,
    /// Percent, when a monitoring source supplies it.
    pub memory_usage: Option<f64>,
}

impl LiveMetrics {
    #[must_use]
    pub fn from_metrics(metrics: &Metrics) -> Self {
        Self {
            error_rate: metrics.error_rate(),
            average_latency_ms: metrics.latency.average,
            requests_per_second: metrics.throughput.requests_per_second,
            total_requests: metrics.requests.total,
            cpu_usage: metrics.custom_gauge(CPU_USAGE),
            memory_usage: metrics.custom_gauge(MEMORY_USAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::RequestMetrics;

    #[test]
    fn test_stop_wins_over_pause() {
        let decision = MonitorDecision::from_actions(
            Vec::new(),
            vec![
                TriggeredAction {
                    kind: ViolationKind::ResponseTime,
                    action: PolicyAction::Pause,
                },
                TriggeredAction {
                    kind: ViolationKind::ErrorRate,
                    action: PolicyAction::Stop,
                },
            ],
        );
        assert!(decision.should_stop);
        assert!(!decision.should_pause);
    }

    #[test]
    fn test_warn_only_neither_stops_nor_pauses() {
        let decision = MonitorDecision::from_actions(
            Vec::new(),
            vec![TriggeredAction {
                kind: ViolationKind::ResponseTime,
                action: PolicyAction::Warn,
            }],
        );
        assert!(!decision.should_stop);
        assert!(!decision.should_pause);
    }

    #[test]
    fn test_live_metrics_from_model() {
        let mut metrics = Metrics::default();
        metrics.requests = RequestMetrics::from_counts(90, 10);
        metrics.errors.total = 10;
        metrics.latency.average = 250.0;
        metrics.custom.insert(CPU_USAGE.to_string(), 42.0);

        let live = LiveMetrics::from_metrics(&metrics);
        assert_eq!(live.error_rate, 10.0);
        assert_eq!(live.average_latency_ms, 250.0);
        assert_eq!(live.cpu_usage, Some(42.0));
        assert_eq!(live.memory_usage, None);
    }

    #[test]
    fn test_violation_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ViolationKind::MaxConcurrentUsers).unwrap();
        assert_eq!(json, "\"maxConcurrentUsers\"");
    }
}
