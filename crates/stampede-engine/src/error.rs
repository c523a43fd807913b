//! Engine-local error types.
//!
//! Neither type escapes a user flow: every [`RequestError`] is converted into a
//! [`TestError`] ledger entry where it happens.

use stampede_core::{ErrorType, TestError};
use thiserror::Error;

/// Failure reported by an HTTP or WebSocket transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,
}

/// Failure of a single flow step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    WebSocket(String),

    #[error("{0}")]
    Custom(String),
}

impl RequestError {
    #[must_use]
    pub const fn error_type(&self) -> ErrorType {
        match self {
            Self::Network(_) => ErrorType::Network,
            Self::Timeout(_) => ErrorType::Timeout,
            Self::Validation(_) => ErrorType::Validation,
            Self::WebSocket(_) => ErrorType::Websocket,
            Self::Custom(_) => ErrorType::Custom,
        }
    }

    /// Maps an HTTP transport failure.
    #[must_use]
    pub fn from_http(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::Timeout(format!("request {err}")),
            other => Self::Network(other.to_string()),
        }
    }

    /// Maps a WebSocket transport failure.
    #[must_use]
    pub fn from_websocket(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::Timeout(format!("websocket {err}")),
            other => Self::WebSocket(other.to_string()),
        }
    }

    /// Ledger entry for this failure.
    #[must_use]
    pub fn to_test_error(&self, endpoint: &str) -> TestError {
        TestError::new(self.error_type(), self.to_string()).with_endpoint(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_map_to_ledger_types() {
        assert_eq!(
            RequestError::from_http(TransportError::Timeout(500)).error_type(),
            ErrorType::Timeout
        );
        assert_eq!(
            RequestError::from_http(TransportError::Connect("refused".into())).error_type(),
            ErrorType::Network
        );
        assert_eq!(
            RequestError::from_websocket(TransportError::Closed).error_type(),
            ErrorType::Websocket
        );
    }

    #[test]
    fn test_ledger_entry_carries_endpoint() {
        let entry = RequestError::Validation("expected status 200, got 500".into())
            .to_test_error("http://localhost/api");
        assert_eq!(entry.error_type, ErrorType::Validation);
        assert_eq!(entry.endpoint.as_deref(), Some("http://localhost/api"));
        assert_eq!(entry.message, "expected status 200, got 500");
    }
}
