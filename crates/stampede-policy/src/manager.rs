//! Policy manager: validates configurations and live metrics against named policies.

use std::collections::{BTreeMap, HashMap};

use serde_json::json;
use stampede_core::telemetry::POLICY_VIOLATIONS;
use stampede_core::{CoreError, CoreResult, Severity, StepAction, TestConfig};
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::policy::{ExecutionPolicy, PolicyAction};
use crate::violation::{
    LiveMetrics, MonitorDecision, PolicyViolation, TriggeredAction, ValidationReport,
    ViolationKind,
};

/// Estimated host CPU percent consumed per simulated user.
const CPU_PERCENT_PER_USER: f64 = 0.1;

/// Estimated host memory percent consumed per simulated user.
const MEMORY_PERCENT_PER_USER: f64 = 0.05;

/// Registry of named execution policies.
///
/// Constructed explicitly by the caller and handed to the orchestrator. It holds no internal
/// locks: callers sharing one manager across concurrent runs must serialize access.
#[derive(Debug)]
pub struct PolicyManager {
    policies: BTreeMap<String, ExecutionPolicy>,
    breakers: HashMap<String, CircuitBreaker>,
    enabled: bool,
    last_violations: Vec<PolicyViolation>,
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyManager {
    /// Manager loaded with the built-in `production`, `development` and `performance` policies.
    #[must_use]
    pub fn new() -> Self {
        let mut manager = Self::empty();
        for policy in ExecutionPolicy::builtin() {
            manager.policies.insert(policy.name.clone(), policy);
        }
        manager
    }

    /// Manager without any policies.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
            breakers: HashMap::new(),
            enabled: true,
            last_violations: Vec::new(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        info!("Policy enforcement enabled");
    }

    /// Turns live monitoring into a no-op. Configuration validation still runs.
    pub fn disable(&mut self) {
        self.enabled = false;
        warn!("Policy enforcement disabled");
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a policy, replacing any policy with the same name.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when the policy definition is inconsistent.
    pub fn add_policy(&mut self, policy: ExecutionPolicy) -> CoreResult<()> {
        policy.validate().map_err(CoreError::ValidationError)?;
        info!("Registering policy '{}'", policy.name);
        self.breakers.remove(&policy.name);
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Replaces an existing policy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no policy has that name, `ValidationError` for bad definitions.
    pub fn update_policy(&mut self, name: &str, mut policy: ExecutionPolicy) -> CoreResult<()> {
        if !self.policies.contains_key(name) {
            return Err(CoreError::not_found("policy", name));
        }
        policy.name = name.to_string();
        policy.validate().map_err(CoreError::ValidationError)?;

        if let Some(breaker) = self.breakers.get_mut(name) {
            breaker.reconfigure(BreakerConfig::from(&policy.circuit_breaker));
        }
        self.policies.insert(name.to_string(), policy);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` when no policy has that name.
    pub fn remove_policy(&mut self, name: &str) -> CoreResult<ExecutionPolicy> {
        self.breakers.remove(name);
        self.policies
            .remove(name)
            .ok_or_else(|| CoreError::not_found("policy", name))
    }

    /// # Errors
    ///
    /// Returns `NotFound` when no policy has that name.
    pub fn get_policy(&self, name: &str) -> CoreResult<&ExecutionPolicy> {
        self.policies
            .get(name)
            .ok_or_else(|| CoreError::not_found("policy", name))
    }

    /// Policy names in lexical order.
    #[must_use]
    pub fn list_policies(&self) -> Vec<&ExecutionPolicy> {
        self.policies.values().collect()
    }

    /// Violations produced by the most recent validation or monitoring call.
    #[must_use]
    pub fn last_violations(&self) -> &[PolicyViolation] {
        &self.last_violations
    }

    /// Resets the breaker kept for `name`.
    pub fn reset_circuit_breaker(&mut self, name: &str) {
        if let Some(breaker) = self.breakers.get_mut(name) {
            breaker.reset();
        }
    }

    /// Serializes every registered policy as a pretty JSON array.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if encoding fails.
    pub fn export_policies(&self) -> CoreResult<String> {
        let policies: Vec<&ExecutionPolicy> = self.policies.values().collect();
        Ok(serde_json::to_string_pretty(&policies)?)
    }

    /// Registers every policy in a JSON array (or single object) produced by
    /// [`Self::export_policies`]. Nothing is registered when any entry is invalid.
    ///
    /// # Errors
    ///
    /// Returns `DeserializationError` for malformed JSON and `ValidationError` for inconsistent
    /// policies.
    pub fn import_policies(&mut self, json: &str) -> CoreResult<usize> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let policies: Vec<ExecutionPolicy> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };

        for policy in &policies {
            policy.validate().map_err(|reason| {
                CoreError::ValidationError(format!("policy '{}': {reason}", policy.name))
            })?;
        }

        let count = policies.len();
        for policy in policies {
            self.breakers.remove(&policy.name);
            self.policies.insert(policy.name.clone(), policy);
        }
        info!("Imported {} policies", count);
        Ok(count)
    }

    /// Checks a test configuration against a policy before any traffic is generated.
    ///
    /// Violations never raise: the configuration is reported invalid and the caller decides
    /// whether to proceed. Approval requirements and resource estimates only add warnings.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the policy does not exist.
    pub fn validate_test_config(
        &mut self,
        config: &TestConfig,
        policy_name: &str,
    ) -> CoreResult<ValidationReport> {
        let policy = self.get_policy(policy_name)?;
        let report = evaluate_config(config, policy);

        record_violations(&report.violations);
        self.last_violations = report.violations.clone();
        debug!(
            "Validated '{}' against policy '{}': {} violations, {} warnings",
            config.name,
            policy_name,
            report.violations.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Checks live metrics against a policy during a run.
    ///
    /// Each threshold breach maps through the policy's action table. The circuit breaker and the
    /// rate-limit budget are evaluated independently and can force a stop or pause on their own.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the policy does not exist.
    pub fn monitor_test_execution(
        &mut self,
        config: &TestConfig,
        live: &LiveMetrics,
        policy_name: &str,
    ) -> CoreResult<MonitorDecision> {
        let policy = self.get_policy(policy_name)?.clone();

        if !self.enabled {
            return Ok(MonitorDecision::default());
        }

        let mut violations = Vec::new();
        let mut actions = Vec::new();
        let mut raise = |violation: PolicyViolation, action: PolicyAction| {
            actions.push(TriggeredAction {
                kind: violation.kind,
                action,
            });
            violations.push(violation);
        };

        let rules = &policy.rules;

        if live.error_rate > rules.max_error_rate {
            raise(
                violation(
                    &policy,
                    ViolationKind::ErrorRate,
                    severity_for(live.error_rate, rules.max_error_rate),
                    format!(
                        "Error rate {:.2}% exceeds {:.2}%",
                        live.error_rate, rules.max_error_rate
                    ),
                    json!(live.error_rate),
                    json!(rules.max_error_rate),
                ),
                policy.actions.on_high_error_rate,
            );
        }

        if live.average_latency_ms > rules.max_response_time_ms {
            raise(
                violation(
                    &policy,
                    ViolationKind::ResponseTime,
                    severity_for(live.average_latency_ms, rules.max_response_time_ms),
                    format!(
                        "Average latency {:.1}ms exceeds {:.1}ms",
                        live.average_latency_ms, rules.max_response_time_ms
                    ),
                    json!(live.average_latency_ms),
                    json!(rules.max_response_time_ms),
                ),
                policy.actions.on_high_latency,
            );
        }

        if let Some(cpu) = live.cpu_usage {
            if cpu > rules.resources.max_cpu_percent {
                raise(
                    violation(
                        &policy,
                        ViolationKind::CpuUsage,
                        severity_for(cpu, rules.resources.max_cpu_percent),
                        format!(
                            "CPU usage {:.1}% exceeds {:.1}%",
                            cpu, rules.resources.max_cpu_percent
                        ),
                        json!(cpu),
                        json!(rules.resources.max_cpu_percent),
                    ),
                    policy.actions.on_resource_exhaustion,
                );
            }
        }

        if let Some(memory) = live.memory_usage {
            if memory > rules.resources.max_memory_percent {
                raise(
                    violation(
                        &policy,
                        ViolationKind::MemoryUsage,
                        severity_for(memory, rules.resources.max_memory_percent),
                        format!(
                            "Memory usage {:.1}% exceeds {:.1}%",
                            memory, rules.resources.max_memory_percent
                        ),
                        json!(memory),
                        json!(rules.resources.max_memory_percent),
                    ),
                    policy.actions.on_resource_exhaustion,
                );
            }
        }

        if live.requests_per_second > rules.max_requests_per_second {
            raise(
                violation(
                    &policy,
                    ViolationKind::RequestRate,
                    severity_for(live.requests_per_second, rules.max_requests_per_second),
                    format!(
                        "Request rate {:.1}/s exceeds {:.1}/s",
                        live.requests_per_second, rules.max_requests_per_second
                    ),
                    json!(live.requests_per_second),
                    json!(rules.max_requests_per_second),
                ),
                policy.actions.on_violation,
            );
        }

        if policy.circuit_breaker.enabled {
            let breaker = self
                .breakers
                .entry(policy.name.clone())
                .or_insert_with(|| CircuitBreaker::new(BreakerConfig::from(&policy.circuit_breaker)));

            if breaker.should_stop(live.error_rate, live.average_latency_ms, live.total_requests) {
                raise(
                    violation(
                        &policy,
                        ViolationKind::CircuitBreaker,
                        Severity::Critical,
                        format!(
                            "Circuit breaker open (error rate {:.2}%, avg latency {:.1}ms)",
                            live.error_rate, live.average_latency_ms
                        ),
                        json!({
                            "error_rate": live.error_rate,
                            "average_latency_ms": live.average_latency_ms,
                        }),
                        json!({
                            "error_threshold": policy.circuit_breaker.error_threshold,
                            "latency_threshold_ms": policy.circuit_breaker.latency_threshold_ms,
                        }),
                    ),
                    PolicyAction::Stop,
                );
            }
        }

        if policy.rate_limit.enabled {
            let per_minute = live.requests_per_second * 60.0;
            let budget = policy.rate_limit.requests_per_minute as f64;
            let hard_limit = budget + policy.rate_limit.burst_limit as f64;

            if per_minute > budget {
                let (severity, action) = if per_minute > hard_limit {
                    (Severity::Critical, PolicyAction::Stop)
                } else {
                    (Severity::High, PolicyAction::Pause)
                };
                raise(
                    violation(
                        &policy,
                        ViolationKind::RateLimit,
                        severity,
                        format!(
                            "Request budget exceeded: {per_minute:.0}/min against {budget:.0}/min"
                        ),
                        json!(per_minute),
                        json!(budget),
                    ),
                    action,
                );
            }
        }

        let decision = MonitorDecision::from_actions(violations, actions);

        if decision.should_stop {
            warn!(
                "Policy '{}' requests stop for '{}': {}",
                policy.name,
                config.name,
                decision.describe()
            );
        } else if decision.should_pause {
            warn!(
                "Policy '{}' requests pause for '{}': {}",
                policy.name,
                config.name,
                decision.describe()
            );
        }

        record_violations(&decision.violations);
        self.last_violations = decision.violations.clone();
        Ok(decision)
    }
}

fn evaluate_config(config: &TestConfig, policy: &ExecutionPolicy) -> ValidationReport {
    let rules = &policy.rules;
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    if config.max_users > rules.max_concurrent_users {
        violations.push(violation(
            policy,
            ViolationKind::MaxConcurrentUsers,
            severity_for(
                f64::from(config.max_users),
                f64::from(rules.max_concurrent_users),
            ),
            format!(
                "max_users {} exceeds the policy limit of {}",
                config.max_users, rules.max_concurrent_users
            ),
            json!(config.max_users),
            json!(rules.max_concurrent_users),
        ));
    }

    if config.duration > rules.max_test_duration_secs {
        violations.push(violation(
            policy,
            ViolationKind::MaxTestDuration,
            severity_for(config.duration as f64, rules.max_test_duration_secs as f64),
            format!(
                "duration {}s exceeds the policy limit of {}s",
                config.duration, rules.max_test_duration_secs
            ),
            json!(config.duration),
            json!(rules.max_test_duration_secs),
        ));
    }

    if !rules.allowed_environments.contains(&config.environment) {
        violations.push(violation(
            policy,
            ViolationKind::Environment,
            Severity::High,
            format!(
                "environment '{}' is not allowed by policy '{}'",
                config.environment, policy.name
            ),
            json!(config.environment),
            json!(rules.allowed_environments),
        ));
    }

    for scenario in &config.scenarios {
        for step in &scenario.flow {
            let StepAction::Http(http) = &step.action else {
                continue;
            };
            let url = http.resolved_url(config.base_url.as_deref());
            if let Some(blocked) = rules
                .blocked_endpoints
                .iter()
                .find(|blocked| url.contains(blocked.as_str()))
            {
                violations.push(violation(
                    policy,
                    ViolationKind::BlockedEndpoint,
                    Severity::Critical,
                    format!(
                        "scenario '{}' targets blocked endpoint '{}' ({})",
                        scenario.name, blocked, url
                    ),
                    json!(url),
                    json!(blocked),
                ));
            }
        }
    }

    if rules.requires_approval {
        warnings.push(format!(
            "policy '{}' requires approval before running this test",
            policy.name
        ));
    }

    let users = f64::from(config.max_users);
    let estimated_cpu = users * CPU_PERCENT_PER_USER;
    if estimated_cpu > rules.resources.max_cpu_percent {
        warnings.push(format!(
            "estimated CPU usage {:.1}% exceeds the {:.1}% threshold",
            estimated_cpu, rules.resources.max_cpu_percent
        ));
    }
    let estimated_memory = users * MEMORY_PERCENT_PER_USER;
    if estimated_memory > rules.resources.max_memory_percent {
        warnings.push(format!(
            "estimated memory usage {:.1}% exceeds the {:.1}% threshold",
            estimated_memory, rules.resources.max_memory_percent
        ));
    }

    ValidationReport {
        is_valid: violations.is_empty(),
        violations,
        warnings,
    }
}

fn violation(
    policy: &ExecutionPolicy,
    kind: ViolationKind,
    severity: Severity,
    message: String,
    current_value: serde_json::Value,
    limit_value: serde_json::Value,
) -> PolicyViolation {
    PolicyViolation {
        kind,
        severity,
        message,
        current_value,
        limit_value,
        policy: policy.name.clone(),
    }
}

/// `critical` at twice the limit or more, `high` otherwise.
fn severity_for(current: f64, limit: f64) -> Severity {
    if limit > 0.0 && current >= limit * 2.0 {
        Severity::Critical
    } else {
        Severity::High
    }
}

fn record_violations(violations: &[PolicyViolation]) {
    for v in violations {
        POLICY_VIOLATIONS
            .with_label_values(&[v.policy.as_str(), v.kind.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{Environment, HttpStep, Scenario, Step};

    fn config(max_users: u32, environment: Environment, url: &str) -> TestConfig {
        TestConfig {
            name: "browse".to_string(),
            description: String::new(),
            environment,
            max_users,
            duration: 60,
            scenarios: vec![Scenario {
                name: "catalog".to_string(),
                weight: 1.0,
                flow: vec![Step::http(HttpStep::get(url))],
            }],
            base_url: None,
            websocket_url: None,
        }
    }

    #[test]
    fn test_production_rejects_too_many_users() {
        let mut manager = PolicyManager::new();
        let cfg = config(1000, Environment::Staging, "https://shop.example/catalog");

        let report = manager.validate_test_config(&cfg, "production").unwrap();
        assert!(!report.is_valid);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::MaxConcurrentUsers));
        // Approval is a warning, never a violation
        assert!(report.warnings.iter().any(|w| w.contains("approval")));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut manager = PolicyManager::new();
        let cfg = config(5000, Environment::Production, "https://shop.example/admin/users");

        let first = manager.validate_test_config(&cfg, "production").unwrap();
        let second = manager.validate_test_config(&cfg, "production").unwrap();
        assert_eq!(first.is_valid, second.is_valid);
        assert_eq!(first.violations, second.violations);
    }

    #[test]
    fn test_blocked_endpoint_and_environment() {
        let mut manager = PolicyManager::new();
        let cfg = config(10, Environment::Development, "https://shop.example/payments/charge");

        let report = manager.validate_test_config(&cfg, "production").unwrap();
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::BlockedEndpoint));
        assert!(kinds.contains(&ViolationKind::Environment));
        assert_eq!(manager.last_violations().len(), report.violations.len());
    }

    #[test]
    fn test_resource_estimate_is_only_a_warning() {
        let mut manager = PolicyManager::new();
        // 950 users → 95% estimated CPU, above development's 90% threshold
        let cfg = config(950, Environment::Development, "http://localhost/health");

        let report = manager.validate_test_config(&cfg, "development").unwrap();
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("CPU")));
    }

    #[test]
    fn test_unknown_policy_is_an_error() {
        let mut manager = PolicyManager::new();
        let cfg = config(1, Environment::Development, "http://localhost/");
        let err = manager.validate_test_config(&cfg, "nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_monitor_maps_actions() {
        let mut manager = PolicyManager::new();
        let cfg = config(10, Environment::Staging, "http://localhost/");

        // Production pauses on latency
        let live = LiveMetrics {
            average_latency_ms: 1_500.0,
            total_requests: 100,
            ..Default::default()
        };
        let decision = manager
            .monitor_test_execution(&cfg, &live, "production")
            .unwrap();
        assert!(decision.should_pause);
        assert!(!decision.should_stop);

        // Development only warns on error rate
        let live = LiveMetrics {
            error_rate: 30.0,
            total_requests: 5,
            ..Default::default()
        };
        let decision = manager
            .monitor_test_execution(&cfg, &live, "development")
            .unwrap();
        assert!(!decision.should_stop);
        assert!(!decision.should_pause);
        assert_eq!(decision.violations.len(), 1);
    }

    #[test]
    fn test_circuit_breaker_forces_stop() {
        let mut manager = PolicyManager::new();
        let cfg = config(10, Environment::Staging, "http://localhost/");

        // 60% errors crosses development's 50% breaker threshold
        let live = LiveMetrics {
            error_rate: 60.0,
            total_requests: 200,
            ..Default::default()
        };
        let decision = manager
            .monitor_test_execution(&cfg, &live, "development")
            .unwrap();
        assert!(decision.should_stop);
        assert!(decision
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::CircuitBreaker));

        // Breaker stays open on the next check even with healthy readings
        let healthy = LiveMetrics {
            total_requests: 300,
            ..Default::default()
        };
        let decision = manager
            .monitor_test_execution(&cfg, &healthy, "development")
            .unwrap();
        assert!(decision.should_stop);

        manager.reset_circuit_breaker("development");
        let decision = manager
            .monitor_test_execution(&cfg, &healthy, "development")
            .unwrap();
        assert!(!decision.should_stop);
    }

    #[test]
    fn test_rate_limit_pause_then_stop() {
        let mut manager = PolicyManager::new();
        let mut policy = ExecutionPolicy::development();
        policy.name = "limited".to_string();
        policy.rules.max_requests_per_second = 1_000.0;
        policy.rate_limit.enabled = true;
        policy.rate_limit.requests_per_minute = 600;
        policy.rate_limit.burst_limit = 300;
        manager.add_policy(policy).unwrap();
        let cfg = config(10, Environment::Staging, "http://localhost/");

        // 12/s = 720/min: over budget, within burst
        let live = LiveMetrics {
            requests_per_second: 12.0,
            ..Default::default()
        };
        let decision = manager.monitor_test_execution(&cfg, &live, "limited").unwrap();
        assert!(decision.should_pause);

        // 20/s = 1200/min: beyond budget + burst
        let live = LiveMetrics {
            requests_per_second: 20.0,
            ..Default::default()
        };
        let decision = manager.monitor_test_execution(&cfg, &live, "limited").unwrap();
        assert!(decision.should_stop);
    }

    #[test]
    fn test_disabled_manager_is_noop() {
        let mut manager = PolicyManager::new();
        manager.disable();
        let cfg = config(10, Environment::Staging, "http://localhost/");
        let live = LiveMetrics {
            error_rate: 99.0,
            total_requests: 1_000,
            ..Default::default()
        };

        let decision = manager
            .monitor_test_execution(&cfg, &live, "production")
            .unwrap();
        assert_eq!(decision, MonitorDecision::default());

        manager.enable();
        let decision = manager
            .monitor_test_execution(&cfg, &live, "production")
            .unwrap();
        assert!(decision.should_stop);
    }

    #[test]
    fn test_policy_crud_and_import_export() {
        let mut manager = PolicyManager::new();
        assert_eq!(manager.list_policies().len(), 3);

        let exported = manager.export_policies().unwrap();
        let mut other = PolicyManager::empty();
        assert_eq!(other.import_policies(&exported).unwrap(), 3);
        assert!(other.get_policy("performance").is_ok());

        let removed = manager.remove_policy("performance").unwrap();
        assert_eq!(removed.name, "performance");
        assert!(manager.get_policy("performance").is_err());
        assert!(manager.remove_policy("performance").is_err());

        let mut relaxed = ExecutionPolicy::production();
        relaxed.rules.max_concurrent_users = 5_000;
        manager.update_policy("production", relaxed).unwrap();
        assert_eq!(
            manager.get_policy("production").unwrap().rules.max_concurrent_users,
            5_000
        );
        assert!(manager
            .update_policy("missing", ExecutionPolicy::development())
            .is_err());
    }

    #[test]
    fn test_malformed_import_is_fatal() {
        let mut manager = PolicyManager::empty();
        let err = manager.import_policies("[{\"name\": ").unwrap_err();
        assert!(matches!(err, CoreError::DeserializationError(_)));
        assert!(manager.list_policies().is_empty());
    }
}
