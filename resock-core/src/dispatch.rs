//! Serialized event dispatcher.
//!
//! Every asynchronous completion — API commands, transport callbacks, timer
//! expirations — is posted onto one mpsc queue and applied to the state
//! machine by this single task, so context mutation is strictly sequential
//! and the machine needs no locking. Timer and transport envelopes carry the
//! epoch they were armed under and are dropped here when superseded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::client::Shared;
use crate::error::ClientError;
use crate::machine::{Action, ConnectionStatus, Epoch, Event, Machine, StateChange};
use crate::transport::{EventSink, TransportConnector, TransportError, TransportLink};

/// Current instant read through the tokio clock, so paused-clock tests
/// observe `tokio::time::advance`. Identical to `Instant::now()` outside
/// the test runtime.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// ════════════════════════════════════════════════════════════════════
// Inbound envelopes
// ════════════════════════════════════════════════════════════════════

/// Commands issued through the public API.
pub(crate) enum ApiCommand {
    Connect {
        url: Url,
        protocols: Vec<String>,
    },
    Disconnect {
        code: u16,
        reason: String,
        ack: oneshot::Sender<()>,
    },
    /// A message was enqueued; wake the drain path.
    Nudge,
}

/// Everything that can arrive on the dispatcher queue.
pub(crate) enum Inbound {
    Api(ApiCommand),
    /// A timer armed under `epoch` fired.
    Timer { epoch: Epoch, event: Event },
    /// The transport adapter reported something for attempt `epoch`.
    Transport { epoch: Epoch, event: Event },
    /// An open attempt for `epoch` produced a live link.
    LinkReady {
        epoch: Epoch,
        link: Box<dyn TransportLink>,
    },
    /// An open attempt for `epoch` failed.
    OpenFailed {
        epoch: Epoch,
        error: TransportError,
    },
    /// The last client handle was dropped.
    Shutdown,
}

// ════════════════════════════════════════════════════════════════════
// Dispatcher
// ════════════════════════════════════════════════════════════════════

pub(crate) struct Dispatcher {
    machine: Machine,
    connector: Arc<dyn TransportConnector>,
    link: Option<Box<dyn TransportLink>>,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Inbound>,
    pending_disconnects: Vec<oneshot::Sender<()>>,
}

impl Dispatcher {
    pub(crate) fn new(
        machine: Machine,
        connector: Arc<dyn TransportConnector>,
        shared: Arc<Shared>,
        tx: mpsc::UnboundedSender<Inbound>,
        rx: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        Self {
            machine,
            connector,
            link: None,
            shared,
            tx,
            rx,
            pending_disconnects: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(inbound) = self.rx.recv().await {
            match inbound {
                Inbound::Api(command) => self.handle_api(command).await,
                Inbound::Timer { epoch, event } | Inbound::Transport { epoch, event } => {
                    if epoch == self.machine.epoch() {
                        self.apply(event).await;
                    } else {
                        // Belongs to a superseded attempt.
                        #[cfg(feature = "tracing")]
                        tracing::trace!(?epoch, ?event, "dropping stale envelope");
                    }
                }
                Inbound::LinkReady { epoch, link } => {
                    if epoch == self.machine.epoch() {
                        self.link = Some(link);
                        self.apply(Event::Open).await;
                    }
                    // else: dropping the link closes the superseded socket.
                }
                Inbound::OpenFailed { epoch, error } => {
                    if epoch == self.machine.epoch() {
                        self.apply(Event::Error(error)).await;
                    }
                }
                Inbound::Shutdown => break,
            }
        }

        // Queue closed or last handle gone: release the socket.
        self.link = None;
        #[cfg(feature = "tracing")]
        tracing::debug!("dispatcher stopped");
    }

    async fn handle_api(&mut self, command: ApiCommand) {
        match command {
            ApiCommand::Connect { url, protocols } => {
                self.apply(Event::Connect { url, protocols }).await;
            }
            ApiCommand::Disconnect { code, reason, ack } => {
                self.pending_disconnects.push(ack);
                self.apply(Event::Disconnect { code, reason }).await;
            }
            ApiCommand::Nudge => {
                self.apply(Event::Enqueued).await;
            }
        }
    }

    async fn apply(&mut self, event: Event) {
        let now = now();
        let actions = self.machine.handle(event, now);
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::OpenTransport {
                url,
                protocols,
                epoch,
            } => self.spawn_open(url, protocols, epoch),
            Action::CloseTransport { code, reason } => {
                if let Some(link) = self.link.as_mut() {
                    if let Err(_error) = link.close(code, &reason).await {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(%_error, "close handshake failed");
                    }
                }
            }
            Action::DropTransport => {
                self.link = None;
            }
            Action::ScheduleRetry {
                delay,
                attempt,
                epoch,
            } => {
                self.shared.metrics.record_reconnect();
                #[cfg(feature = "tracing")]
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                self.schedule(delay, epoch, Event::Retry { attempt });
            }
            Action::ScheduleConnectDeadline { delay, epoch } => {
                self.schedule(delay, epoch, Event::ConnectDeadline);
            }
            Action::SchedulePingDue { delay, epoch } => {
                self.schedule(delay, epoch, Event::PingDue);
            }
            Action::SchedulePongDeadline { delay, epoch } => {
                self.schedule(delay, epoch, Event::PongDeadline);
            }
            Action::ScheduleDrainTick { delay, epoch } => {
                self.schedule(delay, epoch, Event::DrainTick);
            }
            Action::SendPing => {
                if let Some(link) = self.link.as_mut() {
                    if let Err(error) = link.ping().await {
                        self.post_transport_error(error);
                    }
                }
            }
            Action::DrainQueue => self.drain_queue().await,
            Action::RecordLatency(latency) => {
                self.shared.metrics.record_latency(latency);
            }
            Action::NotifyState(change) => self.notify_state(change),
            Action::NotifyMessage(payload) => {
                self.shared.metrics.record_received(payload.len());
                self.shared.listeners.notify_message(&payload);
            }
            Action::CompleteDisconnect => {
                for ack in self.pending_disconnects.drain(..) {
                    let _ = ack.send(());
                }
            }
        }
    }

    /// Spawn the transport open concurrently so the dispatcher keeps
    /// serving events (a disconnect may arrive mid-open). The result comes
    /// back as an envelope; a superseded epoch discards it.
    fn spawn_open(&self, url: Url, protocols: Vec<String>, epoch: Epoch) {
        let connector = self.connector.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let sink = EventSink::new(tx.clone(), epoch);
            let outcome = connector.open(&url, &protocols, sink).await;
            let envelope = match outcome {
                Ok(link) => Inbound::LinkReady { epoch, link },
                Err(error) => Inbound::OpenFailed { epoch, error },
            };
            let _ = tx.send(envelope);
        });
    }

    fn schedule(&self, delay: Duration, epoch: Epoch, event: Event) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbound::Timer { epoch, event });
        });
    }

    /// Route a send/ping failure through the regular error path on the next
    /// loop iteration.
    fn post_transport_error(&self, error: TransportError) {
        let _ = self.tx.send(Inbound::Transport {
            epoch: self.machine.epoch(),
            event: Event::Error(error),
        });
    }

    fn notify_state(&self, change: StateChange) {
        {
            let mut snapshot = self.shared.status.write();
            snapshot.status = change.current;
            snapshot.connected_at = self.machine.context().and_then(|c| c.connected_at);
        }
        if let Some(cause) = change.cause.as_deref() {
            self.shared.metrics.record_error(cause.to_string());
        }
        #[cfg(feature = "tracing")]
        tracing::info!(
            previous = %change.previous,
            current = %change.current,
            cause = change.cause.as_deref().map(tracing::field::display),
            "state change"
        );
        self.shared.listeners.notify_state(&change);
    }

    /// Drain the outbound queue: purge expired entries, then send while the
    /// rate window has room. Locks are never held across an await.
    async fn drain_queue(&mut self) {
        let now = now();

        let expired = self.shared.queue.lock().expire(now);
        if !expired.is_empty() {
            self.shared.metrics.record_expired(expired.len());
            for message in &expired {
                let age_ms = now.duration_since(message.enqueued_at).as_millis() as u64;
                self.shared.metrics.record_error(
                    ClientError::MessageExpired {
                        id: message.id,
                        age_ms,
                    }
                    .to_string(),
                );
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(count = expired.len(), "queued messages expired undelivered");
        }

        if self.machine.status() != ConnectionStatus::Connected {
            return;
        }

        loop {
            let Some(link) = self.link.as_mut() else { return };
            let now = self::now();
            let message = {
                let mut rate = self.shared.rate.lock();
                let mut queue = self.shared.queue.lock();
                if queue.is_empty() || !rate.try_acquire(now) {
                    None
                } else {
                    queue.dequeue()
                }
            };
            let Some(message) = message else { return };

            let bytes = message.payload.len();
            match link.send(message.payload).await {
                Ok(()) => self.shared.metrics.record_sent(bytes),
                Err(error) => {
                    // At-most-once: the message is not requeued; the
                    // failure drives the regular error path.
                    self.post_transport_error(error);
                    return;
                }
            }
        }
    }
}
