//! Configuration management for stampede
//!
//! Settings are layered with the following precedence:
//! 1. Environment variables (highest priority), e.g. `STAMPEDE__EXECUTOR__BATCH_SIZE=25`
//! 2. Config file named by the `STAMPEDE_CONFIG` env var
//! 3. ./config/stampede.{yaml,toml,json}
//! 4. /etc/stampede/stampede.{yaml,toml,json}
//! 5. Hardcoded defaults (lowest priority)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure for stampede
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StampedeConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StampedeConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("STAMPEDE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/stampede").required(false))
            .add_source(File::with_name("/etc/stampede/stampede").required(false));

        builder = builder.add_source(
            Environment::with_prefix("STAMPEDE")
                .separator("__")
                .try_parsing(true),
        );

        let config: StampedeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Executor
            .set_default("executor.batch_size", 50)?
            .set_default("executor.batch_delay_ms", 100)?
            .set_default("executor.default_timeout_ms", 30_000)?
            // WebSocket driver
            .set_default("websocket.connect_timeout_ms", 10_000)?
            .set_default("websocket.wait_for_timeout_ms", 5_000)?
            .set_default("websocket.response_timeout_ms", 1_000)?
            .set_default("websocket.probe_delay_ms", 100)?
            // Live policy monitoring
            .set_default("monitoring.pause_poll_interval_ms", 1_000)?
            .set_default("monitoring.pause_timeout_secs", 30)?
            .set_default("monitoring.sample_resources", true)?
            // Analyzer thresholds
            .set_default("analyzer.error_rate_threshold", 5.0)?
            .set_default("analyzer.p95_threshold_ms", 1000.0)?
            .set_default("analyzer.p99_threshold_ms", 2000.0)?
            .set_default("analyzer.throughput_drop_threshold", 20.0)?
            .set_default("analyzer.endpoint_success_rate_threshold", 90.0)?
            .set_default("analyzer.endpoint_latency_threshold_ms", 500.0)?
            .set_default("analyzer.history_limit", 50)?
            // Sessions
            .set_default("sessions.directory", "./sessions")?
            .set_default("sessions.max_sessions", 100)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.batch_size == 0 {
            return Err(ConfigError::Message(
                "executor.batch_size must be > 0".to_string(),
            ));
        }

        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Message(
                "sessions.max_sessions must be > 0".to_string(),
            ));
        }

        if self.analyzer.history_limit == 0 {
            return Err(ConfigError::Message(
                "analyzer.history_limit must be > 0".to_string(),
            ));
        }

        let thresholds = [
            ("analyzer.error_rate_threshold", self.analyzer.error_rate_threshold),
            ("analyzer.p95_threshold_ms", self.analyzer.p95_threshold_ms),
            ("analyzer.p99_threshold_ms", self.analyzer.p99_threshold_ms),
            (
                "analyzer.throughput_drop_threshold",
                self.analyzer.throughput_drop_threshold,
            ),
        ];
        for (key, value) in thresholds {
            if value <= 0.0 {
                return Err(ConfigError::Message(format!("{key} must be > 0")));
            }
        }

        if self.analyzer.p99_threshold_ms < self.analyzer.p95_threshold_ms {
            return Err(ConfigError::Message(
                "analyzer.p99_threshold_ms must be >= p95_threshold_ms".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Message(format!(
                "logging.format must be `pretty` or `json` (got `{}`)",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: StampedeConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

/// Scenario executor batching
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Maximum simulated users started together
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    pub batch_delay_ms: u64,

    /// Request timeout applied when a step declares none
    pub default_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 100,
            default_timeout_ms: 30_000,
        }
    }
}

impl ExecutorConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// WebSocket load driver timings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSocketConfig {
    pub connect_timeout_ms: u64,

    /// Bound on a `wait_for` step
    pub wait_for_timeout_ms: u64,

    /// How long a plain `send` waits for its response before moving on
    pub response_timeout_ms: u64,

    /// Spacing between default probe messages
    pub probe_delay_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            wait_for_timeout_ms: 5_000,
            response_timeout_ms: 1_000,
            probe_delay_ms: 100,
        }
    }
}

impl WebSocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn wait_for_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }
}

/// Live policy monitoring during a run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Policy consulted at batch boundaries; none disables live monitoring
    #[serde(default)]
    pub policy: Option<String>,

    pub pause_poll_interval_ms: u64,

    /// A pause longer than this stops the run.
    ///
    /// No traffic runs while paused, so cumulative error rate and average latency stay where
    /// they were. Only pauses driven by live signals (host CPU/memory, request rate) can clear;
    /// a pause for high latency or error rate always ends here.
    pub pause_timeout_secs: u64,

    /// Sample host CPU/memory into the `custom` gauges
    pub sample_resources: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            policy: None,
            pause_poll_interval_ms: 1_000,
            pause_timeout_secs: 30,
            sample_resources: true,
        }
    }
}

impl MonitoringConfig {
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_secs(self.pause_timeout_secs)
    }
}

/// Metrics analyzer thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    /// Error rate anomaly threshold in percent
    pub error_rate_threshold: f64,

    pub p95_threshold_ms: f64,

    pub p99_threshold_ms: f64,

    /// Throughput drop versus the previous run, in percent
    pub throughput_drop_threshold: f64,

    pub endpoint_success_rate_threshold: f64,

    pub endpoint_latency_threshold_ms: f64,

    /// Number of past runs retained for trends and prediction
    pub history_limit: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 5.0,
            p95_threshold_ms: 1000.0,
            p99_threshold_ms: 2000.0,
            throughput_drop_threshold: 20.0,
            endpoint_success_rate_threshold: 90.0,
            endpoint_latency_threshold_ms: 500.0,
            history_limit: 50,
        }
    }
}

/// Session store location and retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub directory: PathBuf,

    /// Least recently used sessions beyond this count are evicted
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./sessions"),
            max_sessions: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,

    /// pretty or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
