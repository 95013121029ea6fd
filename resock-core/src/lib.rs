//! # resock-core
//!
//! Resilient WebSocket client core: a connection state machine with
//! automatic bounded-backoff reconnection, a priority-aware rate-limited
//! outbound queue, and ping/pong health monitoring over an unreliable
//! transport.
//!
//! The crate defines the transport *contract* only; a concrete adapter
//! (such as `resock-tungstenite`) supplies the socket. All context mutation
//! happens on one serialized dispatcher task, and every timer and transport
//! callback is tagged with the epoch of the connection attempt it belongs
//! to, so callbacks from superseded attempts are discarded instead of
//! corrupting a newer one.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use resock_core::{Client, ClientConfig, SendOptions};
//! use resock_tungstenite::TungsteniteConnector;
//! use std::sync::Arc;
//!
//! let client = Client::new(
//!     ClientConfig::default().with_max_reconnect_attempts(8),
//!     Arc::new(TungsteniteConnector::new()),
//! );
//! client.on_state_change(|change| {
//!     println!("{} -> {}", change.previous, change.current);
//! });
//! client.on_message(|payload| println!("inbound: {} bytes", payload.len()));
//! client.connect("wss://feed.example.com/ws", &["v1.stream"])?;
//! client.send_with("important", SendOptions::high_priority())?;
//! ```

pub mod backoff;
pub mod classify;
pub mod client;
pub mod config;
pub(crate) mod dispatch;
pub mod error;
pub mod health;
pub mod machine;
pub mod metrics;
pub mod queue;
pub mod transport;

// Public API exports
pub use classify::{classify, classify_close_code, classify_error_kind, ErrorClass};
pub use client::{Client, SendOptions};
pub use config::{ClientConfig, RateLimit};
pub use error::{ClientError, ClientResult};
pub use machine::{ConnectionStatus, Epoch, Event, StateChange};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use queue::{MessageId, Priority};
pub use transport::{
    EventSink, Payload, TransportConnector, TransportError, TransportErrorKind, TransportFuture,
    TransportLink,
};
