//! Scenario executor
//!
//! Runs a batch of simulated users through one scenario. Users run concurrently; each user's
//! steps run strictly in order, and a failed step ends only that user's flow.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use stampede_core::config::ExecutorConfig;
use stampede_core::{
    Expectations, FunctionStep, HttpStep, Scenario, StepAction, TestConfig,
};
use tracing::debug;

use crate::collector::FlowOutcome;
use crate::error::RequestError;
use crate::functions::FunctionRegistry;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::websocket::{UserSocket, WebSocketDriver};

/// Endpoint key for function steps.
pub const FUNCTION_ENDPOINT: &str = "function";

pub struct ScenarioExecutor {
    http: Arc<dyn HttpTransport>,
    functions: FunctionRegistry,
    websocket: Arc<WebSocketDriver>,
    config: ExecutorConfig,
}

impl ScenarioExecutor {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        functions: FunctionRegistry,
        websocket: Arc<WebSocketDriver>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            http,
            functions,
            websocket,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Simulates `users` users of `scenario` concurrently and waits for all of them.
    ///
    /// Scenarios with WebSocket steps get a connection pool first; every connection still open
    /// after the flows settle is closed before returning. The returned outcomes are ready to be
    /// folded into a collector.
    pub async fn run_batch(
        &self,
        test: &TestConfig,
        scenario: &Scenario,
        users: usize,
    ) -> Vec<FlowOutcome> {
        let mut outcomes = Vec::with_capacity(users + 2);

        let mut sockets = match websocket_url(test, scenario) {
            Some(url) if scenario.has_websocket_steps() => {
                let (sockets, pool) = self.websocket.connect_pool(&url, users).await;
                outcomes.push(pool);
                sockets
            }
            _ => (0..users).map(|_| UserSocket::default()).collect(),
        };

        let flows = sockets
            .iter_mut()
            .map(|socket| self.run_user(test, scenario, socket));
        outcomes.extend(join_all(flows).await);

        outcomes.push(self.websocket.close_all(&mut sockets).await);
        debug!(
            "Batch of {} users finished scenario '{}'",
            users, scenario.name
        );
        outcomes
    }

    /// Runs one user's flow to completion or to its first aborting failure.
    pub async fn run_user(
        &self,
        test: &TestConfig,
        scenario: &Scenario,
        socket: &mut UserSocket,
    ) -> FlowOutcome {
        let mut outcome = FlowOutcome::default();

        for step in &scenario.flow {
            let flow = match &step.action {
                StepAction::Http(http) => self.http_step(test, http, &mut outcome).await,
                StepAction::Websocket(ws) => {
                    self.websocket
                        .execute_step(test, ws, socket, &mut outcome)
                        .await
                }
                StepAction::Function(function) => {
                    self.function_step(function, &mut outcome).await
                }
            };
            if flow.is_break() {
                break;
            }
            if step.think_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.think_ms)).await;
            }
        }

        outcome
    }

    async fn http_step(
        &self,
        test: &TestConfig,
        step: &HttpStep,
        outcome: &mut FlowOutcome,
    ) -> ControlFlow<()> {
        let url = step.resolved_url(test.base_url.as_deref());
        let timeout = step
            .timeout_ms
            .map_or_else(|| self.config.default_timeout(), Duration::from_millis);
        let request = HttpRequest {
            method: step.method,
            url: url.clone(),
            headers: step.headers.clone(),
            body: step.body.clone(),
            timeout,
        };

        let started = Instant::now();
        let result = self.http.execute(request).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(response) => match check_response(step.expect.as_ref(), &response, latency_ms) {
                Ok(()) => {
                    outcome.success(&url, "http", latency_ms, response.body.len() as u64);
                    ControlFlow::Continue(())
                }
                Err(err) => {
                    let error = err
                        .to_test_error(&url)
                        .with_status(response.status)
                        .with_response_time(latency_ms);
                    outcome.failure("http", latency_ms, error);
                    ControlFlow::Break(())
                }
            },
            Err(err) => {
                let error = RequestError::from_http(err)
                    .to_test_error(&url)
                    .with_response_time(latency_ms);
                outcome.failure("http", latency_ms, error);
                ControlFlow::Break(())
            }
        }
    }

    async fn function_step(&self, step: &FunctionStep, outcome: &mut FlowOutcome) -> ControlFlow<()> {
        let Some(function) = self.functions.get(&step.name) else {
            let error = RequestError::Custom(format!("unknown function `{}`", step.name));
            outcome.failure("function", 0.0, error.to_test_error(FUNCTION_ENDPOINT));
            return ControlFlow::Break(());
        };

        let started = Instant::now();
        let result = function.call(step.args.clone()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(_) => {
                outcome.success(FUNCTION_ENDPOINT, "function", latency_ms, 0);
                ControlFlow::Continue(())
            }
            Err(message) => {
                let error = RequestError::Custom(format!("function `{}` failed: {message}", step.name))
                    .to_test_error(FUNCTION_ENDPOINT)
                    .with_response_time(latency_ms);
                outcome.failure("function", latency_ms, error);
                ControlFlow::Break(())
            }
        }
    }
}

/// Endpoint a scenario's pool connects to: its first `connect` step URL, else the test default.
fn websocket_url(test: &TestConfig, scenario: &Scenario) -> Option<String> {
    scenario
        .flow
        .iter()
        .find_map(|step| match &step.action {
            StepAction::Websocket(ws) => ws.url.clone(),
            _ => None,
        })
        .or_else(|| test.websocket_url.clone())
}

/// Applies a step's expectations to a response.
///
/// Without an explicit status list any 2xx/3xx passes; other statuses are network failures.
/// Explicit expectations that do not hold are validation failures.
fn check_response(
    expect: Option<&Expectations>,
    response: &HttpResponse,
    latency_ms: f64,
) -> Result<(), RequestError> {
    let expect = expect.cloned().unwrap_or_default();

    match &expect.status {
        Some(allowed) if !allowed.contains(&response.status) => {
            return Err(RequestError::Validation(format!(
                "expected status {:?}, got {}",
                allowed, response.status
            )));
        }
        None if !response.is_success() => {
            return Err(RequestError::Network(format!("HTTP {}", response.status)));
        }
        _ => {}
    }

    if let Some(needle) = &expect.body_contains {
        if !response.body.contains(needle.as_str()) {
            return Err(RequestError::Validation(format!(
                "response body does not contain `{needle}`"
            )));
        }
    }

    if let Some(max) = expect.max_latency_ms {
        if latency_ms > max as f64 {
            return Err(RequestError::Validation(format!(
                "latency {latency_ms:.1}ms exceeds {max}ms"
            )));
        }
    }

    Ok(())
}
