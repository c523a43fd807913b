//! WebSocket load driver
//!
//! Holds one [`UserSocket`] per simulated user. Pools are connected batch by batch; a failed
//! connection is recorded and the rest of the pool still connects. Whatever is still open when a
//! batch settles is closed by [`WebSocketDriver::close_all`].

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};
use stampede_core::config::WebSocketConfig;
use stampede_core::telemetry::WS_ACTIVE_CONNECTIONS;
use stampede_core::{TestConfig, WebSocketAction, WebSocketStep};
use tracing::{debug, warn};

use crate::collector::{FlowOutcome, WsTally};
use crate::error::{RequestError, TransportError};
use crate::transport::{WsConnection, WsConnector};

const KIND: &str = "websocket";

/// Messages sent to every connection when a target exposes a WebSocket endpoint but no
/// scenario drives it.
#[must_use]
pub fn probe_messages() -> Vec<Value> {
    vec![
        json!({ "type": "ping" }),
        json!({ "type": "echo", "data": "stampede probe" }),
        json!({ "type": "subscribe", "channel": "stampede" }),
        json!({ "type": "broadcast", "data": "stampede probe" }),
    ]
}

/// A simulated user's connection slot.
#[derive(Default)]
pub struct UserSocket {
    conn: Option<Box<dyn WsConnection>>,
    url: Option<String>,
    attempted: bool,
}

impl UserSocket {
    /// A slot that connects to `url` on its first `connect` step.
    #[must_use]
    pub fn pending(url: Option<String>) -> Self {
        Self {
            conn: None,
            url,
            attempted: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

/// Outcome of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    /// A reply (containing the marker, if one was asked for) arrived in time.
    Received,
    TimedOut,
}

pub struct WebSocketDriver {
    connector: Arc<dyn WsConnector>,
    config: WebSocketConfig,
    active: AtomicU64,
}

impl WebSocketDriver {
    pub fn new(connector: Arc<dyn WsConnector>, config: WebSocketConfig) -> Self {
        Self {
            connector,
            config,
            active: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Connections currently open across all pools.
    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Opens `count` connections to `url` concurrently.
    ///
    /// Each attempt yields a step record; failures also add a `websocket` ledger entry and bump
    /// `connection_errors`.
    pub async fn connect_pool(&self, url: &str, count: usize) -> (Vec<UserSocket>, FlowOutcome) {
        let attempts = (0..count).map(|_| self.open(url));
        let results = join_all(attempts).await;

        let mut outcome = FlowOutcome::default();
        let mut sockets = Vec::with_capacity(count);
        for (result, latency_ms) in results {
            let mut socket = UserSocket::pending(Some(url.to_string()));
            socket.attempted = true;
            match result {
                Ok(conn) => {
                    outcome.ws.connections += 1;
                    outcome.success(url, KIND, latency_ms, 0);
                    socket.conn = Some(conn);
                }
                Err(err) => {
                    outcome.ws.connection_errors += 1;
                    outcome.failure(KIND, latency_ms, connect_error(url, &err));
                }
            }
            sockets.push(socket);
        }

        if outcome.ws.connection_errors > 0 {
            warn!(
                "{} of {} WebSocket connections to {} failed",
                outcome.ws.connection_errors, count, url
            );
        }
        (sockets, outcome)
    }

    /// Closes every still-open socket with a normal-closure code.
    pub async fn close_all(&self, sockets: &mut [UserSocket]) -> FlowOutcome {
        let mut outcome = FlowOutcome::default();
        for socket in sockets.iter_mut() {
            if self.close(socket).await {
                outcome.ws.closed += 1;
            }
        }
        outcome
    }

    /// Runs one flow step against the user's socket.
    ///
    /// A `wait_for` timeout is recorded and the flow continues; any other failure ends the
    /// user's flow.
    pub async fn execute_step(
        &self,
        test: &TestConfig,
        step: &WebSocketStep,
        socket: &mut UserSocket,
        outcome: &mut FlowOutcome,
    ) -> ControlFlow<()> {
        match step.action {
            WebSocketAction::Connect => self.connect_step(test, step, socket, outcome).await,
            WebSocketAction::Send => self.send_step(step, socket, outcome).await,
            WebSocketAction::Close => {
                let started = Instant::now();
                if self.close(socket).await {
                    outcome.ws.closed += 1;
                    let endpoint = socket.url.clone().unwrap_or_else(|| KIND.to_string());
                    outcome.success(&endpoint, KIND, elapsed_ms(started), 0);
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Connects a pool to `url`, sends every probe message to each open connection, then
    /// closes the pool.
    pub async fn probe(&self, url: &str, count: usize) -> FlowOutcome {
        let (mut sockets, mut outcome) = self.connect_pool(url, count).await;
        let wait = self.config.response_timeout();

        for message in probe_messages() {
            let text = message.to_string();
            let sends = sockets
                .iter_mut()
                .filter(|socket| socket.is_open())
                .map(|socket| self.probe_one(socket, text.clone(), wait));
            for tally in join_all(sends).await {
                outcome.ws.merge(tally);
            }
            tokio::time::sleep(self.config.probe_delay()).await;
        }

        let closed = self.close_all(&mut sockets).await;
        outcome.ws.merge(closed.ws);
        outcome
    }

    async fn probe_one(&self, socket: &mut UserSocket, text: String, wait: Duration) -> WsTally {
        let mut tally = WsTally::default();
        if let Some(conn) = socket.conn.as_mut() {
            if let Err(err) = exchange(conn.as_mut(), text, None, wait, &mut tally).await {
                debug!("Probe failed: {}", err);
                self.drop_connection(socket);
            }
        }
        tally
    }

    async fn connect_step(
        &self,
        test: &TestConfig,
        step: &WebSocketStep,
        socket: &mut UserSocket,
        outcome: &mut FlowOutcome,
    ) -> ControlFlow<()> {
        if socket.is_open() {
            return ControlFlow::Continue(());
        }

        let Some(url) = step
            .url
            .clone()
            .or_else(|| socket.url.clone())
            .or_else(|| test.websocket_url.clone())
        else {
            let error = RequestError::WebSocket("no WebSocket URL configured".to_string());
            outcome.failure(KIND, 0.0, error.to_test_error(KIND));
            return ControlFlow::Break(());
        };

        let reconnect = socket.attempted;
        socket.attempted = true;
        socket.url = Some(url.clone());

        let (result, latency_ms) = self.open(&url).await;
        match result {
            Ok(conn) => {
                socket.conn = Some(conn);
                outcome.ws.connections += 1;
                if reconnect {
                    outcome.ws.reconnects += 1;
                }
                outcome.success(&url, KIND, latency_ms, 0);
                ControlFlow::Continue(())
            }
            Err(err) => {
                outcome.ws.connection_errors += 1;
                outcome.failure(KIND, latency_ms, connect_error(&url, &err));
                ControlFlow::Break(())
            }
        }
    }

    async fn send_step(
        &self,
        step: &WebSocketStep,
        socket: &mut UserSocket,
        outcome: &mut FlowOutcome,
    ) -> ControlFlow<()> {
        let endpoint = socket.url.clone().unwrap_or_else(|| KIND.to_string());

        let Some(message) = &step.message else {
            let error = RequestError::Validation("send step has no message".to_string());
            outcome.failure(KIND, 0.0, error.to_test_error(&endpoint));
            return ControlFlow::Break(());
        };
        let Some(conn) = socket.conn.as_mut() else {
            let error = RequestError::WebSocket("connection is not open".to_string());
            outcome.failure(KIND, 0.0, error.to_test_error(&endpoint));
            return ControlFlow::Break(());
        };

        let wait = match (&step.wait_for, step.timeout_ms) {
            (_, Some(ms)) => Duration::from_millis(ms),
            (Some(_), None) => self.config.wait_for_timeout(),
            (None, None) => self.config.response_timeout(),
        };

        let started = Instant::now();
        let result = exchange(
            conn.as_mut(),
            message_text(message),
            step.wait_for.as_deref(),
            wait,
            &mut outcome.ws,
        )
        .await;
        let latency_ms = elapsed_ms(started);

        match result {
            Ok(Reply::TimedOut) if step.wait_for.is_some() => {
                let marker = step.wait_for.as_deref().unwrap_or_default();
                let error = RequestError::Timeout(format!(
                    "no message containing `{marker}` within {}ms",
                    wait.as_millis()
                ));
                outcome.failure(
                    KIND,
                    latency_ms,
                    error
                        .to_test_error(&endpoint)
                        .with_response_time(latency_ms),
                );
                ControlFlow::Continue(())
            }
            // A plain send does not require an answer.
            Ok(_) => {
                outcome.success(&endpoint, KIND, latency_ms, 0);
                ControlFlow::Continue(())
            }
            Err(err) => {
                self.drop_connection(socket);
                let error = RequestError::from_websocket(err);
                outcome.failure(KIND, latency_ms, error.to_test_error(&endpoint));
                ControlFlow::Break(())
            }
        }
    }

    async fn open(&self, url: &str) -> (Result<Box<dyn WsConnection>, TransportError>, f64) {
        let started = Instant::now();
        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, self.connector.connect(url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        };
        if result.is_ok() {
            self.active.fetch_add(1, Ordering::SeqCst);
            WS_ACTIVE_CONNECTIONS.inc();
        }
        (result, elapsed_ms(started))
    }

    /// Returns whether a connection was open.
    async fn close(&self, socket: &mut UserSocket) -> bool {
        let Some(mut conn) = socket.conn.take() else {
            return false;
        };
        if let Err(err) = conn.close().await {
            debug!("Closing WebSocket failed: {}", err);
        }
        self.release();
        true
    }

    /// Forgets a connection the peer already dropped.
    fn drop_connection(&self, socket: &mut UserSocket) {
        if socket.conn.take().is_some() {
            self.release();
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        WS_ACTIVE_CONNECTIONS.dec();
    }
}

/// Sends `text` and waits up to `wait` for a reply, or for one containing `marker`.
///
/// Every frame received counts towards `messages_received`, with its latency measured from
/// the send.
async fn exchange(
    conn: &mut dyn WsConnection,
    text: String,
    marker: Option<&str>,
    wait: Duration,
    tally: &mut WsTally,
) -> Result<Reply, TransportError> {
    conn.send(text).await?;
    tally.messages_sent += 1;

    let sent_at = Instant::now();
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, conn.recv()).await {
            Err(_) => return Ok(Reply::TimedOut),
            Ok(Ok(Some(message))) => {
                tally.messages_received += 1;
                tally.latencies.push(elapsed_ms(sent_at));
                if marker.map_or(true, |m| message.contains(m)) {
                    return Ok(Reply::Received);
                }
            }
            Ok(Ok(None)) => return Err(TransportError::Closed),
            Ok(Err(err)) => return Err(err),
        }
    }
}

fn connect_error(url: &str, err: &TransportError) -> stampede_core::TestError {
    RequestError::WebSocket(format!("failed to connect to {url}: {err}")).to_test_error(url)
}

fn message_text(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
