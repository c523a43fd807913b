//! Core domain types for the stampede load-testing engine.

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod results;
pub mod scenario;
pub mod telemetry;

pub use config::StampedeConfig;
pub use error::{CoreError, CoreResult};
pub use ids::{SessionId, TestId};
pub use metrics::{
    EndpointMetrics, ErrorFrequency, ErrorMetrics, ErrorType, LatencyMetrics, Metrics,
    RequestMetrics, TestError, ThroughputMetrics, WebSocketMetrics,
};
pub use results::{
    performance_score, Bottleneck, BottleneckType, Grade, Overall, Severity, Summary,
    Termination, TestResults,
};
pub use scenario::{
    Environment, Expectations, FunctionStep, HttpMethod, HttpStep, Scenario, Step, StepAction,
    TestConfig, WebSocketAction, WebSocketStep,
};
