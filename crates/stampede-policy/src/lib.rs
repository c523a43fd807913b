//! Execution policies for stampede.
//!
//! A [`PolicyManager`] holds named [`ExecutionPolicy`] definitions and answers two questions:
//! whether a test configuration may run at all, and whether a running test must be paused or
//! stopped given its live metrics.

pub mod circuit_breaker;
pub mod manager;
pub mod policy;
pub mod violation;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState};
pub use manager::PolicyManager;
pub use policy::{
    CircuitBreakerRules, ExecutionPolicy, PolicyAction, PolicyActions, PolicyRules,
    RateLimitRules, ResourceThresholds,
};
pub use violation::{
    LiveMetrics, MonitorDecision, PolicyViolation, TriggeredAction, ValidationReport,
    ViolationKind,
};
