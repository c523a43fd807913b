//! Test orchestrator
//!
//! Drives a whole run: structural validation, batched execution of every scenario (and of the
//! WebSocket probe when a target has no WebSocket scenario), live policy checks at batch
//! boundaries, and the final scoring and analysis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use stampede_analyzer::anomaly::{detect_endpoint_anomalies, detect_error_rate, detect_latency};
use stampede_analyzer::{generate_recommendations, identify_bottlenecks};
use stampede_core::metrics::{CPU_USAGE, MEMORY_USAGE};
use stampede_core::telemetry::TEST_RUNS;
use stampede_core::{
    CoreResult, Scenario, StampedeConfig, Summary, TestConfig, TestId, TestResults, Termination,
};
use stampede_policy::{LiveMetrics, MonitorDecision, PolicyManager};
use tracing::{debug, info, warn};

use crate::collector::MetricsCollector;
use crate::error::TransportError;
use crate::executor::ScenarioExecutor;
use crate::functions::FunctionRegistry;
use crate::monitor::{ResourceMonitor, SysinfoMonitor};
use crate::transport::{HttpTransport, ReqwestTransport, TungsteniteConnector, WsConnector};
use crate::websocket::WebSocketDriver;

/// A unit of batched work.
enum Workload<'a> {
    Scenario { scenario: &'a Scenario, users: u32 },
    /// Default probe messages against `TestConfig::websocket_url`.
    Probe { url: &'a str, users: u32 },
}

impl Workload<'_> {
    fn name(&self) -> &str {
        match self {
            Self::Scenario { scenario, .. } => &scenario.name,
            Self::Probe { .. } => "websocket probe",
        }
    }

    fn users(&self) -> u32 {
        match self {
            Self::Scenario { users, .. } | Self::Probe { users, .. } => *users,
        }
    }
}

/// What to do after a batch boundary.
enum Checkpoint {
    Continue,
    Stop(Termination),
}

/// Mutable state of one run.
struct RunState {
    collector: MetricsCollector,
    warnings: Vec<String>,
    started: Instant,
}

impl RunState {
    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            warn!("{}", warning);
            self.warnings.push(warning);
        }
    }
}

/// Runs load tests.
///
/// One orchestrator can run any number of tests; each [`run_test`](Self::run_test) call is
/// independent and gets a fresh test id.
pub struct LoadTestOrchestrator {
    config: StampedeConfig,
    executor: ScenarioExecutor,
    websocket: Arc<WebSocketDriver>,
    monitor: Option<Arc<dyn ResourceMonitor>>,
}

impl LoadTestOrchestrator {
    pub fn new(
        config: StampedeConfig,
        http: Arc<dyn HttpTransport>,
        ws_connector: Arc<dyn WsConnector>,
        functions: FunctionRegistry,
    ) -> Self {
        let websocket = Arc::new(WebSocketDriver::new(ws_connector, config.websocket.clone()));
        let executor = ScenarioExecutor::new(
            http,
            functions,
            Arc::clone(&websocket),
            config.executor.clone(),
        );
        Self {
            config,
            executor,
            websocket,
            monitor: None,
        }
    }

    /// Real transports (reqwest, tokio-tungstenite) and host sampling via sysinfo.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn with_default_transports(
        config: StampedeConfig,
        functions: FunctionRegistry,
    ) -> Result<Self, TransportError> {
        let http = Arc::new(ReqwestTransport::new()?);
        let sample = config.monitoring.sample_resources;
        let orchestrator = Self::new(config, http, Arc::new(TungsteniteConnector::new()), functions);
        Ok(if sample {
            orchestrator.with_resource_monitor(Arc::new(SysinfoMonitor::new()))
        } else {
            orchestrator
        })
    }

    #[must_use]
    pub fn with_resource_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &StampedeConfig {
        &self.config
    }

    /// Runs `test` to completion, or until policy or the duration budget ends it.
    ///
    /// Live monitoring uses the policy named in `monitoring.policy`; without one, the run is
    /// not monitored. An early end still yields results: `termination`, `warnings` and an
    /// `overall` of at best `WARNING` tell the caller the run was incomplete.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` when `test` is structurally invalid; no traffic is generated.
    /// - `NotFound` when the monitoring policy does not exist.
    pub async fn run_test(
        &self,
        test: &TestConfig,
        policies: &mut PolicyManager,
    ) -> CoreResult<TestResults> {
        test.validate()?;
        if let Some(policy) = &self.config.monitoring.policy {
            policies.get_policy(policy)?;
        }

        let test_id = TestId::new();
        let start_time = Utc::now();
        info!(
            "Starting load test '{}' ({}): {} users, {}s budget, {} scenarios",
            test.name,
            test_id,
            test.max_users,
            test.duration,
            test.scenarios.len()
        );

        let mut run = RunState {
            collector: MetricsCollector::new(),
            warnings: Vec::new(),
            started: Instant::now(),
        };

        let workloads = self.plan(test, &mut run);
        let termination = self.execute(test, &workloads, policies, &mut run).await?;

        let elapsed = run.started.elapsed();
        self.sample_resources(&mut run.collector);
        run.collector
            .set_active_connections(self.websocket.active_connections());
        let metrics = run.collector.snapshot(elapsed);

        let mut anomalies = Vec::new();
        anomalies.extend(detect_error_rate(&metrics, &self.config.analyzer));
        anomalies.extend(detect_latency(&metrics, &self.config.analyzer));
        anomalies.extend(detect_endpoint_anomalies(&metrics, &self.config.analyzer));

        let mut summary = Summary::scored(&metrics).capped_for(termination);
        summary.bottlenecks = identify_bottlenecks(&metrics);
        summary.recommendations =
            generate_recommendations(&metrics, &anomalies, &self.config.analyzer);

        TEST_RUNS
            .with_label_values(&[summary.overall.as_str()])
            .inc();
        info!(
            "Load test '{}' finished in {:.1}s: {} requests, {:.2}% errors, P95 {:.1}ms, {} (score {:.1})",
            test.name,
            elapsed.as_secs_f64(),
            metrics.requests.total,
            metrics.error_rate(),
            metrics.latency.p95,
            summary.overall,
            summary.score
        );

        Ok(TestResults {
            test_id,
            config: test.clone(),
            start_time,
            end_time: Utc::now(),
            duration: elapsed.as_secs_f64(),
            metrics,
            errors: run.collector.into_errors(),
            warnings: run.warnings,
            termination,
            summary,
        })
    }

    /// Allocates users to scenarios, plus the probe workload when it applies.
    fn plan<'a>(&self, test: &'a TestConfig, run: &mut RunState) -> Vec<Workload<'a>> {
        let mut workloads = Vec::with_capacity(test.scenarios.len() + 1);
        for (scenario, users) in test.scenarios.iter().zip(test.allocate_users()) {
            if users == 0 {
                run.warn(format!(
                    "Scenario '{}' received 0 of {} users after weighting",
                    scenario.name, test.max_users
                ));
                continue;
            }
            workloads.push(Workload::Scenario { scenario, users });
        }

        if let Some(url) = test.websocket_url.as_deref() {
            if !test.uses_websockets() {
                workloads.push(Workload::Probe {
                    url,
                    users: test.max_users,
                });
            }
        }
        workloads
    }

    async fn execute(
        &self,
        test: &TestConfig,
        workloads: &[Workload<'_>],
        policies: &mut PolicyManager,
        run: &mut RunState,
    ) -> CoreResult<Termination> {
        let batch_size = self.config.executor.batch_size.max(1);
        let deadline = run.started + Duration::from_secs(test.duration);

        for workload in workloads {
            info!("Running '{}' with {} users", workload.name(), workload.users());
            let mut remaining = workload.users() as usize;

            while remaining > 0 {
                if Instant::now() >= deadline {
                    run.warn(format!(
                        "Duration budget of {}s elapsed; remaining batches were not started",
                        test.duration
                    ));
                    return Ok(Termination::DurationElapsed);
                }

                let size = remaining.min(batch_size);
                let outcomes = match workload {
                    Workload::Scenario { scenario, .. } => {
                        self.executor.run_batch(test, scenario, size).await
                    }
                    Workload::Probe { url, .. } => vec![self.websocket.probe(url, size).await],
                };
                for outcome in outcomes {
                    run.collector.absorb(outcome);
                }
                remaining -= size;
                debug!(
                    "Batch of {} finished for '{}', {} users remaining",
                    size,
                    workload.name(),
                    remaining
                );

                if let Checkpoint::Stop(termination) = self.checkpoint(test, policies, run).await? {
                    return Ok(termination);
                }
                tokio::time::sleep(self.config.executor.batch_delay()).await;
            }
        }

        Ok(Termination::Completed)
    }

    /// Batch boundary: samples resources and consults the monitoring policy.
    ///
    /// While paused the policy is re-checked every poll interval against the same cumulative
    /// request metrics, so only resource or rate breaches can recover before `pause_timeout`.
    async fn checkpoint(
        &self,
        test: &TestConfig,
        policies: &mut PolicyManager,
        run: &mut RunState,
    ) -> CoreResult<Checkpoint> {
        let Some(policy) = self.config.monitoring.policy.as_deref() else {
            return Ok(Checkpoint::Continue);
        };

        let decision = self.evaluate_policy(test, policies, policy, run)?;
        if decision.should_stop {
            run.warn(format!(
                "Stopped by policy '{policy}': {}",
                decision.describe()
            ));
            return Ok(Checkpoint::Stop(Termination::StoppedByPolicy));
        }
        if !decision.should_pause {
            if !decision.violations.is_empty() {
                run.warn(format!("Policy '{policy}' warning: {}", decision.describe()));
            }
            return Ok(Checkpoint::Continue);
        }

        run.warn(format!("Paused by policy '{policy}': {}", decision.describe()));
        let paused_at = Instant::now();
        let pause_timeout = self.config.monitoring.pause_timeout();
        loop {
            tokio::time::sleep(self.config.monitoring.pause_poll_interval()).await;

            let decision = self.evaluate_policy(test, policies, policy, run)?;
            if decision.should_stop {
                run.warn(format!(
                    "Stopped by policy '{policy}' while paused: {}",
                    decision.describe()
                ));
                return Ok(Checkpoint::Stop(Termination::StoppedByPolicy));
            }
            if !decision.should_pause {
                info!("Policy '{}' conditions recovered, resuming", policy);
                return Ok(Checkpoint::Continue);
            }
            if paused_at.elapsed() >= pause_timeout {
                run.warn(format!(
                    "Pause exceeded {}s; stopping run",
                    pause_timeout.as_secs()
                ));
                return Ok(Checkpoint::Stop(Termination::PauseTimeout));
            }
        }
    }

    fn evaluate_policy(
        &self,
        test: &TestConfig,
        policies: &mut PolicyManager,
        policy: &str,
        run: &mut RunState,
    ) -> CoreResult<MonitorDecision> {
        self.sample_resources(&mut run.collector);
        let metrics = run.collector.snapshot(run.started.elapsed());
        policies.monitor_test_execution(test, &LiveMetrics::from_metrics(&metrics), policy)
    }

    fn sample_resources(&self, collector: &mut MetricsCollector) {
        if !self.config.monitoring.sample_resources {
            return;
        }
        if let Some(monitor) = &self.monitor {
            let sample = monitor.sample();
            collector.set_custom(CPU_USAGE, sample.cpu_percent);
            collector.set_custom(MEMORY_USAGE, sample.memory_percent);
        }
    }
}
