//! Transport collaborator contract.
//!
//! The core never touches a socket directly. An external adapter implements
//! [`TransportConnector`] (opening connections) and [`TransportLink`] (an
//! opaque handle for an open connection, owned by the state machine's
//! context). Inbound traffic and connection-level failures are reported back
//! through an [`EventSink`], which posts onto the client's serialized event
//! queue rather than mutating any shared state.
//!
//! Every sink is tagged with the [`Epoch`] of the connection attempt it was
//! created for; events arriving after that attempt has been superseded are
//! discarded by the dispatcher. The adapter therefore holds no reference into
//! the client at all — only the sink.

use core::future::Future;
use core::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::dispatch::Inbound;
use crate::machine::{Epoch, Event};

// ════════════════════════════════════════════════════════════════════
// Payload
// ════════════════════════════════════════════════════════════════════

/// An opaque outbound or inbound message body.
///
/// The core applies no codec; text and binary frames pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Size of the payload body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Binary(b)
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Payload::Binary(b.to_vec())
    }
}

// ════════════════════════════════════════════════════════════════════
// Transport errors
// ════════════════════════════════════════════════════════════════════

/// Coarse failure category reported by a transport adapter.
///
/// The [`classify`](crate::classify) module maps these onto retry policy;
/// adapters should pick the closest kind rather than defaulting to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The peer refused the connection.
    ConnectionRefused,
    /// An established connection was reset or dropped.
    ConnectionReset,
    /// An I/O deadline elapsed.
    Timeout,
    /// TLS-level failure during or after the handshake.
    Tls,
    /// The peer violated the wire protocol.
    Protocol,
    /// Any other I/O failure.
    Io,
    /// The connection is already closed.
    Closed,
    /// Unclassified adapter-specific failure.
    Other,
}

impl core::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::Timeout => "timeout",
            Self::Tls => "tls failure",
            Self::Protocol => "protocol violation",
            Self::Io => "i/o failure",
            Self::Closed => "connection closed",
            Self::Other => "transport failure",
        };
        f.write_str(s)
    }
}

/// Failure reported by a transport adapter.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }
}

// ════════════════════════════════════════════════════════════════════
// Event sink
// ════════════════════════════════════════════════════════════════════

/// Non-owning back-reference from a transport adapter into the client.
///
/// All methods post an event onto the client's serialized dispatcher queue;
/// none of them block or touch client state directly. The sink is cheap to
/// clone and safe to use from any task. Once the connection attempt it was
/// created for is superseded, posted events become no-ops.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Inbound>,
    epoch: Epoch,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>, epoch: Epoch) -> Self {
        Self { tx, epoch }
    }

    /// An inbound data frame arrived.
    pub fn message(&self, payload: Payload) {
        self.post(Event::Message(payload));
    }

    /// A pong frame arrived.
    pub fn pong(&self) {
        self.post(Event::Pong);
    }

    /// The connection closed. `was_clean` is true when a close handshake
    /// completed; false when the stream simply ended.
    pub fn closed(&self, code: u16, reason: &str, was_clean: bool) {
        self.post(Event::Close {
            code,
            reason: reason.to_owned(),
            was_clean,
        });
    }

    /// The connection failed.
    pub fn failed(&self, error: TransportError) {
        self.post(Event::Error(error));
    }

    fn post(&self, event: Event) {
        // Receiver gone means the client is shutting down; nothing to do.
        let _ = self.tx.send(Inbound::Transport {
            epoch: self.epoch,
            event,
        });
    }
}

impl core::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventSink")
            .field("epoch", &self.epoch)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════
// Connector traits
// ════════════════════════════════════════════════════════════════════

/// Boxed future returned by transport trait methods.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Opens raw connections on behalf of the client.
///
/// One connector serves a client for its whole lifetime; each `open` call
/// produces an independent [`TransportLink`] for a single connection attempt.
pub trait TransportConnector: Send + Sync {
    /// Open a connection to `url`, offering `protocols` as subprotocols.
    ///
    /// Resolving `Ok` is the open signal; the adapter must not report the
    /// open through the sink. Inbound frames, pongs, closes and failures of
    /// the established connection go through `sink`.
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        sink: EventSink,
    ) -> TransportFuture<'_, Box<dyn TransportLink>>;
}

/// Opaque handle for one open connection, owned by the connection context.
///
/// Dropping the link must release the underlying socket.
pub trait TransportLink: Send {
    /// Send one data frame.
    fn send(&mut self, payload: Payload) -> TransportFuture<'_, ()>;

    /// Send a ping frame.
    fn ping(&mut self) -> TransportFuture<'_, ()>;

    /// Begin a graceful close handshake.
    fn close(&mut self, code: u16, reason: &str) -> TransportFuture<'_, ()>;
}
