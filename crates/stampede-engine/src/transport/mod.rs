//! Transport abstraction for the systems under test
//!
//! The engine only needs two client operations: issue an HTTP request, and hold a WebSocket
//! connection that can send and receive text frames. Each has a real backend and a
//! deterministic fake:
//! - [`ReqwestTransport`] / [`fake::FakeHttpTransport`]
//! - [`TungsteniteConnector`] / [`fake::FakeWsConnector`]
//!
//! # Examples
//!
//! ```rust
//! use stampede_engine::transport::fake::FakeHttpTransport;
//! use stampede_engine::transport::{HttpRequest, HttpTransport};
//!
//! # async fn example() {
//! let http = FakeHttpTransport::new().route("/health", 200, "ok");
//!
//! let response = http
//!     .execute(HttpRequest::get("http://localhost/health"))
//!     .await
//!     .unwrap();
//! assert_eq!(response.status, 200);
//! assert_eq!(http.calls().len(), 1);
//! # }
//! ```

pub mod fake;
mod http;
mod ws;

pub use http::ReqwestTransport;
pub use ws::TungsteniteConnector;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stampede_core::HttpMethod;

use crate::error::TransportError;

/// Request timeout used when none is given.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Sent as `application/json` when present.
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// 2xx and 3xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// HTTP client used by the scenario executor.
///
/// Implementations must be thread-safe and must honour [`HttpRequest::timeout`], reporting an
/// exceeded deadline as [`TransportError::Timeout`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Opens WebSocket connections.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsConnection>, TransportError>;
}

/// One open WebSocket connection.
#[async_trait]
pub trait WsConnection: Send {
    /// Sends a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text (or UTF-8 decoded binary) frame. `Ok(None)` once the peer has closed.
    ///
    /// May wait indefinitely; callers bound it with a timeout.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Closes with a normal-closure code.
    async fn close(&mut self) -> Result<(), TransportError>;
}
