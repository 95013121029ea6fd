//! Error types for the resock client.

use thiserror::Error;

use crate::queue::MessageId;
use crate::transport::TransportError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during client operations.
///
/// Validation errors (`InvalidUrl`, `InvalidProtocol`) are returned
/// synchronously from [`Client::connect`](crate::client::Client::connect) and
/// cause no state transition. Everything else is surfaced through the
/// state-change listener while simultaneously driving the transition logic.
#[derive(Error, Debug)]
pub enum ClientError {
    /// URL failed synchronous validation at `connect()`.
    #[error("Invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Subprotocol token failed synchronous validation at `connect()`.
    #[error("Invalid subprotocol token '{protocol}'")]
    InvalidProtocol { protocol: String },

    /// Outbound queue is at capacity; the message was rejected.
    #[error("Outbound queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// A queued message exceeded its time-to-live before dispatch.
    #[error("Queued message {id} expired after {age_ms}ms")]
    MessageExpired { id: MessageId, age_ms: u64 },

    /// The transport did not open within `connection_timeout`.
    #[error("Connection attempt timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// No pong arrived within `pong_timeout` of the last ping.
    #[error("No pong received within {timeout_ms}ms")]
    PongTimeout { timeout_ms: u64 },

    /// Failure reported by the transport layer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer closed the connection.
    #[error("Connection closed (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// The automatic retry budget is exhausted; an explicit `connect()` is
    /// required to resume.
    #[error("Reconnect attempts exhausted after {attempts} failures")]
    RetriesExhausted { attempts: u32 },

    /// Operation requires an active or pending connection.
    #[error("Client is disconnected")]
    NotConnected,

    /// The client task has shut down.
    #[error("Client is closed")]
    Closed,

    /// Generic error at the application boundary.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// Create an `InvalidUrl` error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a `QueueFull` error.
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// True if this error was rejected synchronously at `connect()`.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. } | Self::InvalidProtocol { .. }
        )
    }

    /// True if this error represents a timeout of some kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::PongTimeout { .. }
        )
    }
}
