//! Public client API.
//!
//! [`Client`] is a cheap-to-clone handle onto a background dispatcher task.
//! `connect` validates synchronously and never blocks; `send` enqueues and
//! returns immediately; `disconnect` resolves once cleanup has completed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::config::ClientConfig;
use crate::dispatch::{ApiCommand, Dispatcher, Inbound};
use crate::error::{ClientError, ClientResult};
use crate::machine::{ConnectionStatus, Machine, StateChange};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::queue::{MessageId, MessageQueue, Priority, RateWindow};
use crate::transport::{Payload, TransportConnector};

// ════════════════════════════════════════════════════════════════════
// Shared state
// ════════════════════════════════════════════════════════════════════

/// Status view maintained by the dispatcher for synchronous queries.
pub(crate) struct StatusSnapshot {
    pub(crate) status: ConnectionStatus,
    pub(crate) connected_at: Option<Instant>,
}

/// Listener registry. Callbacks run on the dispatcher task; keep them
/// short.
#[derive(Default)]
pub(crate) struct Listeners {
    state: Mutex<Vec<Arc<dyn Fn(&StateChange) + Send + Sync>>>,
    message: Mutex<Vec<Arc<dyn Fn(&Payload) + Send + Sync>>>,
}

impl Listeners {
    pub(crate) fn notify_state(&self, change: &StateChange) {
        let listeners: Vec<_> = self.state.lock().iter().cloned().collect();
        for listener in listeners {
            listener(change);
        }
    }

    pub(crate) fn notify_message(&self, payload: &Payload) {
        let listeners: Vec<_> = self.message.lock().iter().cloned().collect();
        for listener in listeners {
            listener(payload);
        }
    }
}

/// State shared between client handles and the dispatcher.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) queue: Mutex<MessageQueue>,
    pub(crate) rate: Mutex<RateWindow>,
    pub(crate) status: RwLock<StatusSnapshot>,
    pub(crate) listeners: Listeners,
    pub(crate) metrics: Arc<ClientMetrics>,
}

/// Posts a shutdown envelope when the last client handle is dropped, so the
/// dispatcher (and its re-arming timers) cannot outlive its owners.
struct ShutdownGuard {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(Inbound::Shutdown);
    }
}

// ════════════════════════════════════════════════════════════════════
// Send options
// ════════════════════════════════════════════════════════════════════

/// Options for [`Client::send_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub priority: Priority,
    /// Time-to-live override; `None` uses `message_timeout` from the config.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    pub fn high_priority() -> Self {
        Self {
            priority: Priority::High,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ════════════════════════════════════════════════════════════════════
// Client
// ════════════════════════════════════════════════════════════════════

/// Resilient WebSocket client handle.
///
/// Cloning yields another handle onto the same connection. The background
/// dispatcher shuts down when the last handle is dropped.
///
/// # Example
///
/// ```rust,ignore
/// use resock_core::{Client, ClientConfig};
///
/// let client = Client::new(ClientConfig::default(), connector);
/// client.on_state_change(|change| println!("{} -> {}", change.previous, change.current));
/// client.on_message(|payload| println!("got {} bytes", payload.len()));
/// client.connect("wss://feed.example.com/ws", &[])?;
/// let id = client.send("subscribe: trades")?;
/// ```
#[derive(Clone)]
pub struct Client {
    tx: mpsc::UnboundedSender<Inbound>,
    shared: Arc<Shared>,
    _guard: Arc<ShutdownGuard>,
}

impl Client {
    /// Create a client over the given transport and spawn its dispatcher.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: ClientConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let now = crate::dispatch::now();
        let shared = Arc::new(Shared {
            queue: Mutex::new(MessageQueue::new(config.message_queue_size)),
            rate: Mutex::new(RateWindow::new(config.rate_limit, now)),
            status: RwLock::new(StatusSnapshot {
                status: ConnectionStatus::Disconnected,
                connected_at: None,
            }),
            listeners: Listeners::default(),
            metrics: ClientMetrics::shared(),
            config: config.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let machine = Machine::new(config);
        let dispatcher = Dispatcher::new(machine, connector, shared.clone(), tx.clone(), rx);
        tokio::spawn(dispatcher.run());

        Self {
            _guard: Arc::new(ShutdownGuard { tx: tx.clone() }),
            tx,
            shared,
        }
    }

    /// Validate `url` and `protocols` synchronously, then begin connecting
    /// in the background. Never blocks.
    ///
    /// Validation failures are returned here and cause no state transition.
    /// Connection progress is reported through the state-change listener.
    pub fn connect(&self, url: &str, protocols: &[&str]) -> ClientResult<()> {
        let url = validate_url(url)?;
        let protocols = validate_protocols(protocols)?;
        self.tx
            .send(Inbound::Api(ApiCommand::Connect { url, protocols }))
            .map_err(|_| ClientError::Closed)
    }

    /// Initiate a graceful shutdown; resolves once cleanup has completed.
    pub async fn disconnect(&self, code: u16, reason: &str) -> ClientResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Inbound::Api(ApiCommand::Disconnect {
                code,
                reason: reason.to_owned(),
                ack,
            }))
            .map_err(|_| ClientError::Closed)?;
        done.await.map_err(|_| ClientError::Closed)
    }

    /// Queue a normal-priority message; returns its id immediately.
    pub fn send(&self, payload: impl Into<Payload>) -> ClientResult<MessageId> {
        self.send_with(payload, SendOptions::default())
    }

    /// Queue a message with explicit priority and time-to-live.
    ///
    /// Fails with `QueueFull` when a normal-priority message meets a full
    /// queue; a high-priority message evicts the oldest normal entry
    /// instead. Fails with `NotConnected` when no connection is active or
    /// pending — queued data would have nowhere to go.
    pub fn send_with(
        &self,
        payload: impl Into<Payload>,
        options: SendOptions,
    ) -> ClientResult<MessageId> {
        if self.status() == ConnectionStatus::Disconnected {
            return Err(ClientError::NotConnected);
        }

        let now = crate::dispatch::now();
        let ttl = options.timeout.unwrap_or(self.shared.config.message_timeout);
        let receipt = self
            .shared
            .queue
            .lock()
            .enqueue(payload.into(), options.priority, Some(now + ttl), now)
            .map_err(|error| {
                self.shared.metrics.record_queue_rejection();
                self.shared.metrics.record_error(error.to_string());
                error
            })?;

        if let Some(evicted) = receipt.evicted {
            // The displaced normal-priority message is surfaced, never
            // silently dropped.
            self.shared
                .metrics
                .record_error(format!("message {} evicted by high-priority send", evicted.id));
            #[cfg(feature = "tracing")]
            tracing::warn!(id = %evicted.id, "normal-priority message evicted");
        }

        let _ = self.tx.send(Inbound::Api(ApiCommand::Nudge));
        Ok(receipt.id)
    }

    /// Register a state-change listener. Transition causes (transport
    /// errors, retry exhaustion, fatal closes) arrive on the same channel.
    pub fn on_state_change(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.shared.listeners.state.lock().push(Arc::new(listener));
    }

    /// Register an inbound-message listener.
    pub fn on_message(&self, listener: impl Fn(&Payload) + Send + Sync + 'static) {
        self.shared.listeners.message.lock().push(Arc::new(listener));
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.read().status
    }

    /// True once the current session's uptime exceeds `stability_timeout`.
    /// Derived from `connected`; not a state of its own.
    pub fn is_stabilized(&self) -> bool {
        let snapshot = self.shared.status.read();
        snapshot.status == ConnectionStatus::Connected
            && snapshot.connected_at.is_some_and(|opened| {
                crate::dispatch::now().duration_since(opened) >= self.shared.config.stability_timeout
            })
    }

    /// Number of messages currently queued.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

// ════════════════════════════════════════════════════════════════════
// Validation
// ════════════════════════════════════════════════════════════════════

fn validate_url(raw: &str) -> ClientResult<Url> {
    let url = Url::parse(raw).map_err(|e| ClientError::invalid_url(raw, e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ClientError::invalid_url(
                raw,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }
    if url.host_str().is_none() {
        return Err(ClientError::invalid_url(raw, "missing host"));
    }
    Ok(url)
}

/// RFC 6455 subprotocol names are HTTP tokens.
fn validate_protocols(protocols: &[&str]) -> ClientResult<Vec<String>> {
    const SEPARATORS: &[char] = &[
        '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}', ' ',
        '\t',
    ];
    protocols
        .iter()
        .map(|p| {
            let valid = !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(&c));
            if valid {
                Ok((*p).to_owned())
            } else {
                Err(ClientError::InvalidProtocol {
                    protocol: (*p).to_owned(),
                })
            }
        })
        .collect()
}
