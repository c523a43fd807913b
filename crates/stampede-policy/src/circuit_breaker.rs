//! Circuit breaker for live test monitoring
//!
//! Trips when the target's error rate or average latency crosses the policy's breaker
//! thresholds, and keeps the run stopped for a cooldown period.
//!
//! # States
//!
//! - **Closed:** Normal operation, load generation allowed
//! - **Open:** Breaker tripped, every check demands a stop
//! - **HalfOpen:** Cooldown elapsed, clean checks close the breaker again
//!
//! # Example
//!
//! ```rust
//! use stampede_policy::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState};
//! use std::time::Duration;
//!
//! let mut cb = CircuitBreaker::new(BreakerConfig {
//!     error_threshold: 5.0,
//!     latency_threshold_ms: 3_000.0,
//!     cooldown: Duration::from_secs(60),
//!     min_requests: 10,
//!     half_open_successes: 1,
//! });
//!
//! // 20% errors over 100 requests trips the breaker
//! assert!(cb.should_stop(20.0, 120.0, 100));
//! assert_eq!(cb.state(), CircuitBreakerState::Open);
//! ```

use std::time::{Duration, Instant};

use crate::policy::CircuitBreakerRules;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Normal operation.
    Closed,

    /// Breaker tripped, load must stop.
    Open,

    /// Testing recovery.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Error rate in percent that trips the breaker.
    pub error_threshold: f64,

    /// Average latency in milliseconds that trips the breaker.
    pub latency_threshold_ms: f64,

    /// Cooldown period before transitioning to HalfOpen.
    pub cooldown: Duration,

    /// Requests observed before the breaker may trip.
    pub min_requests: u64,

    /// Consecutive clean checks required to close from HalfOpen.
    pub half_open_successes: u32,
}

impl From<&CircuitBreakerRules> for BreakerConfig {
    fn from(rules: &CircuitBreakerRules) -> Self {
        Self {
            error_threshold: rules.error_threshold,
            latency_threshold_ms: rules.latency_threshold_ms,
            cooldown: Duration::from_secs(rules.reset_timeout_secs),
            min_requests: rules.min_requests,
            half_open_successes: 1,
        }
    }
}

/// Breaker tracking one policy's view of the target.
///
/// Owned by the policy manager and driven from a single orchestrating task, so state lives in
/// plain fields.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitBreakerState,
    last_transition: Instant,
    half_open_successes: u32,
    trips: u64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in Closed state.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitBreakerState::Closed,
            last_transition: Instant::now(),
            half_open_successes: 0,
            trips: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    /// Number of times the breaker has tripped.
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.trips
    }

    /// Replaces thresholds, keeping the current state.
    pub fn reconfigure(&mut self, config: BreakerConfig) {
        self.config = config;
    }

    /// True when the given live readings breach the breaker thresholds.
    #[must_use]
    pub fn is_breach(&self, error_rate: f64, average_latency_ms: f64, total_requests: u64) -> bool {
        if total_requests < self.config.min_requests {
            return false;
        }
        error_rate > self.config.error_threshold
            || average_latency_ms > self.config.latency_threshold_ms
    }

    /// Feeds one monitoring reading and returns whether the run must stop.
    pub fn should_stop(
        &mut self,
        error_rate: f64,
        average_latency_ms: f64,
        total_requests: u64,
    ) -> bool {
        let breach = self.is_breach(error_rate, average_latency_ms, total_requests);

        match self.state {
            CircuitBreakerState::Closed => {
                if breach {
                    tracing::warn!(
                        "Circuit breaker tripping: error_rate={:.2}%, avg_latency={:.1}ms",
                        error_rate,
                        average_latency_ms
                    );
                    self.transition_to_open();
                    true
                } else {
                    false
                }
            }
            CircuitBreakerState::Open => {
                if self.last_transition.elapsed() < self.config.cooldown {
                    return true;
                }
                self.transition_to_half_open();
                self.evaluate_half_open(breach)
            }
            CircuitBreakerState::HalfOpen => self.evaluate_half_open(breach),
        }
    }

    fn evaluate_half_open(&mut self, breach: bool) -> bool {
        if breach {
            tracing::warn!("Circuit breaker breach during HalfOpen, reopening");
            self.transition_to_open();
            return true;
        }

        self.half_open_successes += 1;
        if self.half_open_successes >= self.config.half_open_successes {
            tracing::info!(
                "Circuit breaker closing after {} clean checks",
                self.half_open_successes
            );
            self.transition_to_closed();
        }
        false
    }

    /// Force transition to Closed state (manual reset).
    pub fn reset(&mut self) {
        tracing::info!("Circuit breaker manually reset to Closed");
        self.transition_to_closed();
    }

    fn transition_to_open(&mut self) {
        self.state = CircuitBreakerState::Open;
        self.last_transition = Instant::now();
        self.half_open_successes = 0;
        self.trips += 1;
    }

    fn transition_to_half_open(&mut self) {
        tracing::info!("Circuit breaker transitioning to HalfOpen for testing");
        self.state = CircuitBreakerState::HalfOpen;
        self.last_transition = Instant::now();
        self.half_open_successes = 0;
    }

    fn transition_to_closed(&mut self) {
        self.state = CircuitBreakerState::Closed;
        self.last_transition = Instant::now();
        self.half_open_successes = 0;
    }
}
