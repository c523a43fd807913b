//! Execution policies: named bundles of safety rules and violation responses.

use serde::{Deserialize, Serialize};
use stampede_core::Environment;

/// Response to a policy breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Warn,
    Pause,
    Stop,
}

/// Named safety policy applied during validation and live monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub rules: PolicyRules,

    pub actions: PolicyActions,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerRules,

    #[serde(default)]
    pub rate_limit: RateLimitRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRules {
    pub max_concurrent_users: u32,

    pub max_requests_per_second: f64,

    pub max_test_duration_secs: u64,

    pub allowed_environments: Vec<Environment>,

    /// Substrings that must not appear in any HTTP step URL.
    #[serde(default)]
    pub blocked_endpoints: Vec<String>,

    #[serde(default)]
    pub requires_approval: bool,

    /// Live error-rate ceiling in percent.
    pub max_error_rate: f64,

    /// Live average latency ceiling in milliseconds.
    pub max_response_time_ms: f64,

    #[serde(default)]
    pub resources: ResourceThresholds,
}

/// Host resource ceilings in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceThresholds {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            max_memory_percent: 85.0,
        }
    }
}

/// Mapping from violation class to the action it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyActions {
    /// Request-rate and other generic limit breaches.
    pub on_violation: PolicyAction,
    pub on_high_error_rate: PolicyAction,
    pub on_high_latency: PolicyAction,
    pub on_resource_exhaustion: PolicyAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRules {
    pub enabled: bool,

    /// Error rate in percent that trips the breaker.
    pub error_threshold: f64,

    /// Average latency in milliseconds that trips the breaker.
    pub latency_threshold_ms: f64,

    /// Cooldown before the breaker half-opens.
    pub reset_timeout_secs: u64,

    /// Requests observed before the breaker may trip.
    #[serde(default = "default_min_requests")]
    pub min_requests: u64,
}

fn default_min_requests() -> u64 {
    10
}

impl Default for CircuitBreakerRules {
    fn default() -> Self {
        Self {
            enabled: false,
            error_threshold: 50.0,
            latency_threshold_ms: 10_000.0,
            reset_timeout_secs: 30,
            min_requests: default_min_requests(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRules {
    pub enabled: bool,

    pub requests_per_minute: u64,

    /// Headroom above `requests_per_minute` tolerated with a pause before the run is stopped.
    pub burst_limit: u64,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 60_000,
            burst_limit: 6_000,
        }
    }
}

impl ExecutionPolicy {
    /// Strict limits for live systems; runs need sign-off.
    #[must_use]
    pub fn production() -> Self {
        Self {
            name: "production".to_string(),
            description: "Strict limits for testing live systems".to_string(),
            rules: PolicyRules {
                max_concurrent_users: 50,
                max_requests_per_second: 100.0,
                max_test_duration_secs: 300,
                allowed_environments: vec![Environment::Staging, Environment::Production],
                blocked_endpoints: vec![
                    "/admin".to_string(),
                    "/payments".to_string(),
                    "/delete".to_string(),
                ],
                requires_approval: true,
                max_error_rate: 1.0,
                max_response_time_ms: 1_000.0,
                resources: ResourceThresholds {
                    max_cpu_percent: 70.0,
                    max_memory_percent: 75.0,
                },
            },
            actions: PolicyActions {
                on_violation: PolicyAction::Stop,
                on_high_error_rate: PolicyAction::Stop,
                on_high_latency: PolicyAction::Pause,
                on_resource_exhaustion: PolicyAction::Stop,
            },
            circuit_breaker: CircuitBreakerRules {
                enabled: true,
                error_threshold: 5.0,
                latency_threshold_ms: 3_000.0,
                reset_timeout_secs: 60,
                min_requests: 10,
            },
            rate_limit: RateLimitRules {
                enabled: true,
                requests_per_minute: 6_000,
                burst_limit: 600,
            },
        }
    }

    /// Relaxed limits for local and shared development targets.
    #[must_use]
    pub fn development() -> Self {
        Self {
            name: "development".to_string(),
            description: "Relaxed limits for development environments".to_string(),
            rules: PolicyRules {
                max_concurrent_users: 1_000,
                max_requests_per_second: 1_000.0,
                max_test_duration_secs: 3_600,
                allowed_environments: vec![Environment::Development, Environment::Staging],
                blocked_endpoints: Vec::new(),
                requires_approval: false,
                max_error_rate: 20.0,
                max_response_time_ms: 5_000.0,
                resources: ResourceThresholds {
                    max_cpu_percent: 90.0,
                    max_memory_percent: 90.0,
                },
            },
            actions: PolicyActions {
                on_violation: PolicyAction::Warn,
                on_high_error_rate: PolicyAction::Warn,
                on_high_latency: PolicyAction::Warn,
                on_resource_exhaustion: PolicyAction::Pause,
            },
            circuit_breaker: CircuitBreakerRules {
                enabled: true,
                error_threshold: 50.0,
                latency_threshold_ms: 10_000.0,
                reset_timeout_secs: 30,
                min_requests: 10,
            },
            rate_limit: RateLimitRules::default(),
        }
    }

    /// Highest limits, for dedicated capacity tests; runs need sign-off.
    #[must_use]
    pub fn performance() -> Self {
        Self {
            name: "performance".to_string(),
            description: "High limits for dedicated performance testing".to_string(),
            rules: PolicyRules {
                max_concurrent_users: 10_000,
                max_requests_per_second: 10_000.0,
                max_test_duration_secs: 7_200,
                allowed_environments: vec![Environment::Development, Environment::Staging],
                blocked_endpoints: Vec::new(),
                requires_approval: true,
                max_error_rate: 10.0,
                max_response_time_ms: 3_000.0,
                resources: ResourceThresholds {
                    max_cpu_percent: 95.0,
                    max_memory_percent: 95.0,
                },
            },
            actions: PolicyActions {
                on_violation: PolicyAction::Pause,
                on_high_error_rate: PolicyAction::Pause,
                on_high_latency: PolicyAction::Warn,
                on_resource_exhaustion: PolicyAction::Stop,
            },
            circuit_breaker: CircuitBreakerRules {
                enabled: true,
                error_threshold: 25.0,
                latency_threshold_ms: 10_000.0,
                reset_timeout_secs: 30,
                min_requests: 10,
            },
            rate_limit: RateLimitRules {
                enabled: true,
                requests_per_minute: 600_000,
                burst_limit: 60_000,
            },
        }
    }

    /// The three policies shipped by default.
    #[must_use]
    pub fn builtin() -> Vec<Self> {
        vec![Self::production(), Self::development(), Self::performance()]
    }

    /// Checks internal consistency of a policy definition.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("policy name must not be empty".into());
        }
        if self.rules.max_concurrent_users == 0 {
            return Err("rules.max_concurrent_users must be >= 1".into());
        }
        if self.rules.max_test_duration_secs == 0 {
            return Err("rules.max_test_duration_secs must be >= 1".into());
        }
        if self.rules.max_requests_per_second <= 0.0 {
            return Err("rules.max_requests_per_second must be > 0".into());
        }
        if self.rules.allowed_environments.is_empty() {
            return Err("rules.allowed_environments must not be empty".into());
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == 0 {
            return Err("rate_limit.requests_per_minute must be >= 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies_are_valid() {
        for policy in ExecutionPolicy::builtin() {
            assert!(policy.validate().is_ok(), "{} is invalid", policy.name);
        }
    }

    #[test]
    fn test_production_is_strictest() {
        let production = ExecutionPolicy::production();
        let development = ExecutionPolicy::development();
        let performance = ExecutionPolicy::performance();

        assert_eq!(production.rules.max_concurrent_users, 50);
        assert!(production.rules.requires_approval);
        assert!(!development.rules.requires_approval);
        assert!(performance.rules.requires_approval);
        assert!(
            performance.rules.max_concurrent_users > development.rules.max_concurrent_users
        );
    }

    #[test]
    fn test_invalid_policy() {
        let mut policy = ExecutionPolicy::development();
        policy.rules.allowed_environments.clear();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_json_round_trip() {
        let policy = ExecutionPolicy::production();
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"on_high_error_rate\":\"stop\""));

        let back: ExecutionPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
