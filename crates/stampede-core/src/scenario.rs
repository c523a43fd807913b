//! Test configuration: what to run, against which environment, with how many users.
//!
//! A [`TestConfig`] is built by the caller before a run and never mutated afterwards. Each
//! [`Scenario`] carries a relative weight and an ordered flow of [`Step`]s that every simulated
//! user executes sequentially.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Target environment of a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(CoreError::ValidationError(format!(
                "unknown environment `{other}`"
            ))),
        }
    }
}

/// Immutable description of a load test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub environment: Environment,

    /// Total simulated users, shared across scenarios by weight.
    pub max_users: u32,

    /// Run duration budget in seconds.
    pub duration: u64,

    pub scenarios: Vec<Scenario>,

    /// Prefix joined to HTTP step URLs that start with `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default WebSocket endpoint. When set and no scenario contains WebSocket steps, the
    /// target is still exercised with probe messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
}

/// Named, weighted user journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    /// Relative share of `max_users`; must be strictly positive.
    pub weight: f64,

    pub flow: Vec<Step>,
}

impl Scenario {
    /// True when the flow drives a persistent WebSocket connection.
    #[must_use]
    pub fn has_websocket_steps(&self) -> bool {
        self.flow
            .iter()
            .any(|step| matches!(step.action, StepAction::Websocket(_)))
    }

    /// HTTP steps of the flow, in declaration order.
    pub fn http_steps(&self) -> impl Iterator<Item = &HttpStep> {
        self.flow.iter().filter_map(|step| match &step.action {
            StepAction::Http(http) => Some(http),
            _ => None,
        })
    }
}

/// One step of a flow plus the think time that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: StepAction,

    /// Pause after the step, suspending only this user's flow.
    #[serde(default)]
    pub think_ms: u64,
}

impl Step {
    #[must_use]
    pub fn http(step: HttpStep) -> Self {
        Self {
            action: StepAction::Http(step),
            think_ms: 0,
        }
    }

    #[must_use]
    pub fn websocket(step: WebSocketStep) -> Self {
        Self {
            action: StepAction::Websocket(step),
            think_ms: 0,
        }
    }

    #[must_use]
    pub fn function(step: FunctionStep) -> Self {
        Self {
            action: StepAction::Function(step),
            think_ms: 0,
        }
    }

    #[must_use]
    pub fn with_think(mut self, think_ms: u64) -> Self {
        self.think_ms = think_ms;
        self
    }
}

/// Step payload, dispatched statically by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Http(HttpStep),
    Websocket(WebSocketStep),
    Function(FunctionStep),
}

impl StepAction {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Websocket(_) => "websocket",
            Self::Function(_) => "function",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

/// A single HTTP request issued by a simulated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpStep {
    #[serde(default)]
    pub method: HttpMethod,

    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// JSON body; sent as `application/json` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Expectations>,
}

impl HttpStep {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: None,
            expect: None,
        }
    }

    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// URL with `base_url` applied to relative paths.
    #[must_use]
    pub fn resolved_url(&self, base_url: Option<&str>) -> String {
        match base_url {
            Some(base) if self.url.starts_with('/') => {
                format!("{}{}", base.trim_end_matches('/'), self.url)
            }
            _ => self.url.clone(),
        }
    }
}

/// Assertions applied to an HTTP response. Without them, any 2xx/3xx counts as success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expectations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<u16>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSocketAction {
    Connect,
    Send,
    Close,
}

/// A step executed over a user's persistent WebSocket connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketStep {
    pub action: WebSocketAction,

    /// Endpoint for `connect`; falls back to [`TestConfig::websocket_url`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,

    /// Marker that must appear in a received message before the step completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl WebSocketStep {
    #[must_use]
    pub fn connect() -> Self {
        Self {
            action: WebSocketAction::Connect,
            url: None,
            message: None,
            wait_for: None,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn send(message: Value) -> Self {
        Self {
            action: WebSocketAction::Send,
            message: Some(message),
            ..Self::connect()
        }
    }

    #[must_use]
    pub fn close() -> Self {
        Self {
            action: WebSocketAction::Close,
            ..Self::connect()
        }
    }

    #[must_use]
    pub fn wait_for(mut self, marker: impl Into<String>) -> Self {
        self.wait_for = Some(marker.into());
        self
    }
}

/// Invocation of a caller-registered function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStep {
    pub name: String,

    #[serde(default)]
    pub args: Value,
}

impl TestConfig {
    /// Collects every structural problem with this configuration.
    #[must_use]
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
        if self.max_users == 0 {
            errors.push("max_users must be greater than 0".to_string());
        }
        if self.duration == 0 {
            errors.push("duration must be greater than 0".to_string());
        }
        if self.scenarios.is_empty() {
            errors.push("scenarios must not be empty".to_string());
        }

        for (index, scenario) in self.scenarios.iter().enumerate() {
            let label = if scenario.name.trim().is_empty() {
                errors.push(format!("scenario #{index} must have a name"));
                format!("#{index}")
            } else {
                format!("`{}`", scenario.name)
            };

            if !(scenario.weight.is_finite() && scenario.weight > 0.0) {
                errors.push(format!(
                    "scenario {label} weight must be greater than 0 (got {})",
                    scenario.weight
                ));
            }
            if scenario.flow.is_empty() {
                errors.push(format!("scenario {label} flow must not be empty"));
            }
        }

        errors
    }

    /// Structural validation. Failures are fatal to a run and abort it before any traffic.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] listing every problem found.
    pub fn validate(&self) -> CoreResult<()> {
        let errors = self.structural_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::invalid_config(errors))
        }
    }

    /// Users allocated to each scenario, in declaration order.
    ///
    /// Each scenario receives `floor(max_users * weight / total_weight)`. Users lost to rounding
    /// are not redistributed, so the sum never exceeds `max_users`.
    #[must_use]
    pub fn allocate_users(&self) -> Vec<u32> {
        let total_weight: f64 = self
            .scenarios
            .iter()
            .map(|s| s.weight)
            .filter(|w| w.is_finite() && *w > 0.0)
            .sum();

        if total_weight <= 0.0 {
            return vec![0; self.scenarios.len()];
        }

        self.scenarios
            .iter()
            .map(|scenario| {
                if !(scenario.weight.is_finite() && scenario.weight > 0.0) {
                    return 0;
                }
                let share = f64::from(self.max_users) * scenario.weight / total_weight;
                // Guard against float error pushing a share over the total.
                (share.floor() as u32).min(self.max_users)
            })
            .collect()
    }

    /// True when any scenario needs the WebSocket driver.
    #[must_use]
    pub fn uses_websockets(&self) -> bool {
        self.scenarios.iter().any(Scenario::has_websocket_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario(name: &str, weight: f64) -> Scenario {
        Scenario {
            name: name.to_string(),
            weight,
            flow: vec![Step::http(HttpStep::get("/health"))],
        }
    }

    fn config(max_users: u32, scenarios: Vec<Scenario>) -> TestConfig {
        TestConfig {
            name: "checkout".to_string(),
            description: String::new(),
            environment: Environment::Staging,
            max_users,
            duration: 60,
            scenarios,
            base_url: None,
            websocket_url: None,
        }
    }

    #[test]
    fn test_boundary_configs_fail_validation() {
        let zero_users = config(0, vec![scenario("a", 1.0)]);
        let no_scenarios = config(10, vec![]);
        let mut zero_duration = config(10, vec![scenario("a", 1.0)]);
        zero_duration.duration = 0;

        for cfg in [zero_users, no_scenarios, zero_duration] {
            match cfg.validate() {
                Err(CoreError::InvalidConfig { errors }) => assert!(!errors.is_empty()),
                other => panic!("expected InvalidConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_positive_weight_is_structural_error() {
        let cfg = config(10, vec![scenario("a", 0.0), scenario("b", -1.0)]);
        let errors = cfg.structural_errors();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_allocation_floors_and_never_exceeds_max_users() {
        let cfg = config(10, vec![scenario("a", 1.0), scenario("b", 1.0), scenario("c", 1.0)]);
        let allocation = cfg.allocate_users();
        assert_eq!(allocation, vec![3, 3, 3]);

        for max_users in [1_u32, 7, 99, 100, 1001] {
            let cfg = config(
                max_users,
                vec![scenario("a", 0.7), scenario("b", 0.2), scenario("c", 0.1)],
            );
            let total: u32 = cfg.allocate_users().iter().sum();
            assert!(total <= max_users);
        }
    }

    #[test]
    fn test_step_json_shape() {
        let raw = json!({
            "http": { "method": "POST", "url": "/orders", "body": { "sku": 42 } },
            "think_ms": 250
        });
        let step: Step = serde_json::from_value(raw).unwrap();
        assert_eq!(step.think_ms, 250);
        match step.action {
            StepAction::Http(http) => {
                assert_eq!(http.method, HttpMethod::Post);
                assert_eq!(http.body, Some(json!({ "sku": 42 })));
            }
            other => panic!("unexpected step {other:?}"),
        }

        let ws: Step = serde_json::from_value(json!({
            "websocket": { "action": "send", "message": "hi", "wait_for": "ack" }
        }))
        .unwrap();
        assert_eq!(ws.action.kind(), "websocket");
    }

    #[test]
    fn test_relative_url_joins_base() {
        let step = HttpStep::get("/api/items");
        assert_eq!(
            step.resolved_url(Some("http://localhost:8080/")),
            "http://localhost:8080/api/items"
        );
        assert_eq!(step.resolved_url(None), "/api/items");
    }
}
