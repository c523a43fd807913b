//! Load generation engine for stampede.
//!
//! [`LoadTestOrchestrator::run_test`] is the entry point. It drives the [`ScenarioExecutor`]
//! and [`WebSocketDriver`] over pluggable transports, folds every user's observations into a
//! [`MetricsCollector`], and consults a policy manager between batches.

pub mod collector;
pub mod error;
pub mod executor;
pub mod functions;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod transport;
pub mod websocket;

pub use collector::{FlowOutcome, MetricsCollector, StepRecord, WsTally};
pub use error::{RequestError, TransportError};
pub use executor::ScenarioExecutor;
pub use functions::{FunctionRegistry, StepFunction};
pub use monitor::{ResourceMonitor, ResourceSample, StaticMonitor, SysinfoMonitor};
pub use orchestrator::LoadTestOrchestrator;
pub use report::{ReportFormat, ResultWriter};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TungsteniteConnector,
    WsConnection, WsConnector,
};
pub use websocket::{UserSocket, WebSocketDriver};
