//! Deterministic in-process transports
//!
//! Features:
//! - Scripted HTTP responses matched by URL substring (first match wins)
//! - Simulated latency and injected network/timeout failures
//! - Call history for assertions
//! - An echo WebSocket server with seeded round-trip delays and scripted replies
//! - Scripted connection failures
//!
//! Neither fake touches the network, so a whole run can be driven inside a unit test.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{HttpRequest, HttpResponse, HttpTransport, WsConnection, WsConnector};
use crate::error::TransportError;

/// Failure injected by a [`Route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Connection refused.
    Network,
    /// Reported as exceeding the request timeout.
    Timeout,
}

/// Scripted response for every URL containing `pattern`.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: String,
    status: u16,
    body: String,
    latency: Duration,
    failure: Option<InjectedFailure>,
}

/// Scripted HTTP server.
///
/// Unmatched URLs answer `200 OK`. Simulated latency longer than the request timeout is
/// reported as a timeout, like a real client would.
#[derive(Debug, Default)]
pub struct FakeHttpTransport {
    routes: Vec<Route>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl FakeHttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, pattern: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        self.routes.push(Route {
            pattern: pattern.into(),
            status,
            body: body.into(),
            latency: Duration::ZERO,
            failure: None,
        });
        self
    }

    /// Like [`route`](Self::route) with a simulated server delay.
    #[must_use]
    pub fn route_with_latency(
        mut self,
        pattern: impl Into<String>,
        status: u16,
        body: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        self = self.route(pattern, status, body);
        if let Some(route) = self.routes.last_mut() {
            route.latency = Duration::from_millis(latency_ms);
        }
        self
    }

    /// Every request to a matching URL fails.
    #[must_use]
    pub fn fail(mut self, pattern: impl Into<String>, failure: InjectedFailure) -> Self {
        self = self.route(pattern, 0, "");
        if let Some(route) = self.routes.last_mut() {
            route.failure = Some(failure);
        }
        self
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn find_route(&self, url: &str) -> Option<&Route> {
        self.routes.iter().find(|route| url.contains(&route.pattern))
    }
}

#[async_trait]
impl HttpTransport for FakeHttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().push(request.clone());
        let timeout_ms = request.timeout.as_millis() as u64;

        let Some(route) = self.find_route(&request.url).cloned() else {
            return Ok(HttpResponse {
                status: 200,
                body: "OK".to_string(),
            });
        };

        match route.failure {
            Some(InjectedFailure::Network) => {
                return Err(TransportError::Connect(format!(
                    "connection refused: {}",
                    request.url
                )))
            }
            Some(InjectedFailure::Timeout) => return Err(TransportError::Timeout(timeout_ms)),
            None => {}
        }

        if route.latency > request.timeout {
            tokio::time::sleep(request.timeout).await;
            return Err(TransportError::Timeout(timeout_ms));
        }
        if !route.latency.is_zero() {
            tokio::time::sleep(route.latency).await;
        }

        Ok(HttpResponse {
            status: route.status,
            body: route.body,
        })
    }
}

/// Echo WebSocket server.
///
/// Every sent frame is echoed back after a round-trip delay drawn from a seeded RNG, so runs
/// with the same seed see the same delays. Frames containing a scripted trigger are answered
/// with the scripted reply instead.
#[derive(Debug)]
pub struct FakeWsConnector {
    replies: Arc<Vec<(String, String)>>,
    min_delay_ms: u64,
    max_delay_ms: u64,
    rng: Mutex<StdRng>,
    /// Connection attempts (1-based) that fail.
    failing_attempts: Vec<u64>,
    refuse_all: bool,
    attempts: AtomicU64,
}

impl Default for FakeWsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWsConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::seeded(7)
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            replies: Arc::new(Vec::new()),
            min_delay_ms: 1,
            max_delay_ms: 5,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failing_attempts: Vec::new(),
            refuse_all: false,
            attempts: AtomicU64::new(0),
        }
    }

    /// Round-trip delay range in milliseconds (inclusive).
    #[must_use]
    pub fn with_delay_range(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.min_delay_ms = min_ms.min(max_ms);
        self.max_delay_ms = max_ms.max(min_ms);
        self
    }

    /// Answers frames containing `trigger` with `reply` instead of an echo.
    #[must_use]
    pub fn with_reply(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.replies).push((trigger.into(), reply.into()));
        self
    }

    /// Fails the given connection attempts, counted from 1 in call order.
    #[must_use]
    pub fn failing_attempts(mut self, attempts: impl IntoIterator<Item = u64>) -> Self {
        self.failing_attempts.extend(attempts);
        self
    }

    /// Fails every connection attempt.
    #[must_use]
    pub fn refusing(mut self) -> Self {
        self.refuse_all = true;
        self
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WsConnector for FakeWsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsConnection>, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse_all || self.failing_attempts.contains(&attempt) {
            return Err(TransportError::Connect(format!("connection refused: {url}")));
        }

        // Each connection gets its own generator seeded from the shared one.
        let seed = self.rng.lock().gen::<u64>();
        Ok(Box::new(FakeWsConnection {
            replies: Arc::clone(&self.replies),
            min_delay_ms: self.min_delay_ms,
            max_delay_ms: self.max_delay_ms,
            rng: StdRng::seed_from_u64(seed),
            pending: VecDeque::new(),
            open: true,
        }))
    }
}

struct FakeWsConnection {
    replies: Arc<Vec<(String, String)>>,
    min_delay_ms: u64,
    max_delay_ms: u64,
    rng: StdRng,
    /// Outgoing replies with their delay.
    pending: VecDeque<(Duration, String)>,
    open: bool,
}

impl FakeWsConnection {
    fn reply_to(&self, text: &str) -> String {
        self.replies
            .iter()
            .find(|(trigger, _)| text.contains(trigger.as_str()))
            .map_or_else(|| text.to_string(), |(_, reply)| reply.clone())
    }
}

#[async_trait]
impl WsConnection for FakeWsConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let delay = self.rng.gen_range(self.min_delay_ms..=self.max_delay_ms);
        let reply = self.reply_to(&text);
        self.pending.push_back((Duration::from_millis(delay), reply));
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        if !self.open {
            return Ok(None);
        }
        match self.pending.pop_front() {
            Some((delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(Some(reply))
            }
            // A silent server; the caller's timeout ends the wait.
            None => {
                futures::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_match_by_substring() {
        let http = FakeHttpTransport::new()
            .route("/api/items", 201, "created")
            .fail("/down", InjectedFailure::Network);

        let ok = http
            .execute(HttpRequest::get("http://host/api/items?page=1"))
            .await
            .unwrap();
        assert_eq!(ok.status, 201);
        assert_eq!(ok.body, "created");

        let fallback = http.execute(HttpRequest::get("http://host/other")).await.unwrap();
        assert_eq!(fallback.status, 200);

        let err = http.execute(HttpRequest::get("http://host/down")).await;
        assert!(matches!(err, Err(TransportError::Connect(_))));
        assert_eq!(http.call_count(), 3);
    }

    #[tokio::test]
    async fn test_latency_beyond_timeout_is_reported_as_timeout() {
        let http = FakeHttpTransport::new().route_with_latency("/slow", 200, "late", 50);
        let mut request = HttpRequest::get("http://host/slow");
        request.timeout = Duration::from_millis(5);

        let err = http.execute(request).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(5));
    }

    #[tokio::test]
    async fn test_ws_echo_and_scripted_reply() {
        let connector = FakeWsConnector::new().with_reply("subscribe", "subscribed");
        let mut conn = connector.connect("ws://host/feed").await.unwrap();

        conn.send("hello".into()).await.unwrap();
        conn.send("{\"type\":\"subscribe\"}".into()).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(conn.recv().await.unwrap().as_deref(), Some("subscribed"));

        conn.close().await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), None);
        assert_eq!(conn.send("late".into()).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_ws_silent_server_needs_caller_timeout() {
        let connector = FakeWsConnector::new();
        let mut conn = connector.connect("ws://host").await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(10), conn.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_ws_scripted_connect_failures() {
        let connector = FakeWsConnector::new().failing_attempts([2]);
        assert!(connector.connect("ws://host").await.is_ok());
        assert!(connector.connect("ws://host").await.is_err());
        assert!(connector.connect("ws://host").await.is_ok());
        assert_eq!(connector.attempts(), 3);
    }
}
