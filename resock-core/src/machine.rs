//! Connection state machine.
//!
//! The machine is a pure decision core: [`Machine::handle`] consumes one
//! [`Event`] and returns the [`Action`]s the dispatcher must execute. It
//! performs no I/O, arms no timers and notifies no listeners itself, which
//! keeps every transition unit-testable without a runtime.
//!
//! Epoch discipline: every connection attempt gets a fresh [`Epoch`]. Timers
//! and transport callbacks carry the epoch they were created under; the
//! dispatcher drops anything tagged with a superseded epoch before it
//! reaches the machine. The machine bumps the epoch on each failure and on
//! cleanup, which is what "cancels" outstanding timers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use crate::backoff::ReconnectScheduler;
use crate::classify::{classify_close_code, classify_error_kind, ErrorClass};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::health::HealthMonitor;
use crate::transport::{Payload, TransportError};

// ════════════════════════════════════════════════════════════════════
// Status, epoch, events
// ════════════════════════════════════════════════════════════════════

/// Connection status. Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

impl core::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnecting => f.write_str("disconnecting"),
            Self::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

/// Generation token for one connection attempt.
///
/// A timer or transport callback created under epoch `n` is a no-op once
/// the machine has moved past `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub const fn initial() -> Self {
        Epoch(0)
    }

    #[must_use]
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

/// Everything that can happen to the state machine, as one tagged variant
/// per kind so transition handling is exhaustive at compile time.
#[derive(Debug, Clone)]
pub enum Event {
    /// Caller asked for a connection (already validated).
    Connect { url: Url, protocols: Vec<String> },
    /// Caller asked for a graceful shutdown.
    Disconnect { code: u16, reason: String },
    /// The transport finished opening.
    Open,
    /// The transport failed.
    Error(TransportError),
    /// The connection closed.
    Close {
        code: u16,
        reason: String,
        was_clean: bool,
    },
    /// An inbound data frame arrived.
    Message(Payload),
    /// A message was appended to the outbound queue.
    Enqueued,
    /// Periodic drain/TTL tick.
    DrainTick,
    /// Time to send a heartbeat ping.
    PingDue,
    /// A pong frame arrived.
    Pong,
    /// The pong deadline for the outstanding ping passed.
    PongDeadline,
    /// The transport did not open within the connection timeout.
    ConnectDeadline,
    /// Backoff elapsed for reconnection attempt `attempt`.
    Retry { attempt: u32 },
    /// The retry budget is exhausted.
    MaxRetries,
}

/// State-change notification delivered to listeners.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub previous: ConnectionStatus,
    pub current: ConnectionStatus,
    /// The error that caused this transition, when there was one.
    pub cause: Option<Arc<ClientError>>,
}

/// Effects the dispatcher must carry out after a transition.
#[derive(Debug)]
pub enum Action {
    /// Open the transport for the given attempt.
    OpenTransport {
        url: Url,
        protocols: Vec<String>,
        epoch: Epoch,
    },
    /// Begin a graceful close handshake on the current link.
    CloseTransport { code: u16, reason: String },
    /// Drop the current link without a close handshake.
    DropTransport,
    /// Arm the backoff timer for reconnection attempt `attempt`.
    ScheduleRetry {
        delay: Duration,
        attempt: u32,
        epoch: Epoch,
    },
    /// Arm the connection-open deadline.
    ScheduleConnectDeadline { delay: Duration, epoch: Epoch },
    /// Arm the next heartbeat ping.
    SchedulePingDue { delay: Duration, epoch: Epoch },
    /// Arm the pong deadline for the ping just sent.
    SchedulePongDeadline { delay: Duration, epoch: Epoch },
    /// Arm the periodic drain/TTL tick.
    ScheduleDrainTick { delay: Duration, epoch: Epoch },
    /// Send a ping frame on the current link.
    SendPing,
    /// Drain the outbound queue through the rate limiter.
    DrainQueue,
    /// Record a heartbeat round-trip latency sample.
    RecordLatency(Duration),
    /// Notify state-change listeners (and update the status snapshot).
    NotifyState(StateChange),
    /// Notify message listeners.
    NotifyMessage(Payload),
    /// Cleanup finished; resolve pending `disconnect()` waiters.
    CompleteDisconnect,
}

// ════════════════════════════════════════════════════════════════════
// Connection context
// ════════════════════════════════════════════════════════════════════

/// Per-session state, created by `Connect` and discarded on cleanup.
#[derive(Debug)]
pub struct ConnectionContext {
    pub url: Url,
    pub protocols: Vec<String>,
    pub epoch: Epoch,
    pub reconnect_attempts: u32,
    pub last_error: Option<Arc<ClientError>>,
    pub last_class: Option<ErrorClass>,
    pub close_code: Option<u16>,
    pub disconnect_reason: Option<String>,
    pub connected_at: Option<Instant>,
    pub last_stable_connection: Option<Instant>,
}

impl ConnectionContext {
    fn new(url: Url, protocols: Vec<String>, epoch: Epoch) -> Self {
        Self {
            url,
            protocols,
            epoch,
            reconnect_attempts: 0,
            last_error: None,
            last_class: None,
            close_code: None,
            disconnect_reason: None,
            connected_at: None,
            last_stable_connection: None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Machine
// ════════════════════════════════════════════════════════════════════

/// The connection state machine and the components it orchestrates.
pub struct Machine {
    config: ClientConfig,
    scheduler: ReconnectScheduler,
    health: HealthMonitor,
    status: ConnectionStatus,
    epoch: Epoch,
    ctx: Option<ConnectionContext>,
}

impl Machine {
    pub fn new(config: ClientConfig) -> Self {
        let scheduler = ReconnectScheduler::new(&config);
        let health = HealthMonitor::new(config.pong_timeout, config.stability_timeout);
        Self {
            config,
            scheduler,
            health,
            status: ConnectionStatus::Disconnected,
            epoch: Epoch::initial(),
            ctx: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn context(&self) -> Option<&ConnectionContext> {
        self.ctx.as_ref()
    }

    /// Derived stability flag; never a machine state of its own.
    pub fn is_stabilized(&self, now: Instant) -> bool {
        self.status == ConnectionStatus::Connected && self.health.is_stabilized(now)
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        self.health.mean_latency()
    }

    /// Apply one event and return the effects to execute.
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Action> {
        match self.status {
            ConnectionStatus::Disconnected => self.handle_disconnected(event, now),
            ConnectionStatus::Connecting => self.handle_connecting(event, now),
            ConnectionStatus::Connected => self.handle_connected(event, now),
            ConnectionStatus::Disconnecting => self.handle_disconnecting(event, now),
            ConnectionStatus::Reconnecting => self.handle_reconnecting(event, now),
        }
    }

    // ── Per-state handlers ──────────────────────────────────────────

    fn handle_disconnected(&mut self, event: Event, _now: Instant) -> Vec<Action> {
        match event {
            Event::Connect { url, protocols } => self.start_connect(url, protocols),
            // Nothing to tear down; acknowledge immediately.
            Event::Disconnect { .. } => vec![Action::CompleteDisconnect],
            _ => Vec::new(),
        }
    }

    fn handle_connecting(&mut self, event: Event, now: Instant) -> Vec<Action> {
        match event {
            Event::Open => self.on_open(now),
            Event::Error(error) => {
                let class = classify_error_kind(error.kind);
                self.on_failure(class, ClientError::Transport(error))
            }
            Event::ConnectDeadline => {
                let timeout_ms = self.config.connection_timeout.as_millis() as u64;
                self.on_failure(ErrorClass::Transient, ClientError::ConnectTimeout { timeout_ms })
            }
            Event::Close { code, reason, .. } => {
                // The open attempt died under us; no retry from here.
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.close_code = Some(code);
                }
                self.to_disconnected(Some(Arc::new(ClientError::ConnectionClosed {
                    code,
                    reason,
                })))
            }
            Event::Disconnect { .. } => {
                // Abort the attempt outright; there is no link to close yet.
                self.to_disconnected(None)
            }
            _ => Vec::new(),
        }
    }

    fn handle_connected(&mut self, event: Event, now: Instant) -> Vec<Action> {
        match event {
            Event::Error(error) => {
                let class = classify_error_kind(error.kind);
                self.on_failure(class, ClientError::Transport(error))
            }
            Event::Close {
                code,
                reason,
                was_clean,
            } => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.close_code = Some(code);
                }
                let class = classify_close_code(code);
                let cause = ClientError::ConnectionClosed {
                    code,
                    reason: reason.clone(),
                };
                if was_clean || !class.is_retryable() {
                    // Server-initiated graceful close, or a verdict that
                    // forbids retrying.
                    self.to_disconnected(Some(Arc::new(cause)))
                } else {
                    self.on_failure(class, cause)
                }
            }
            Event::Disconnect { code, reason } => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.disconnect_reason = Some(reason.clone());
                }
                let previous = self.status;
                self.status = ConnectionStatus::Disconnecting;
                vec![
                    Action::NotifyState(StateChange {
                        previous,
                        current: self.status,
                        cause: None,
                    }),
                    Action::CloseTransport { code, reason },
                ]
            }
            Event::Message(payload) => vec![Action::NotifyMessage(payload)],
            Event::PingDue => {
                let epoch = self.epoch;
                let mut actions = Vec::new();
                if self.health.record_ping(now) {
                    actions.push(Action::SendPing);
                    actions.push(Action::SchedulePongDeadline {
                        delay: self.config.pong_timeout,
                        epoch,
                    });
                }
                actions.push(Action::SchedulePingDue {
                    delay: self.config.ping_interval,
                    epoch,
                });
                actions
            }
            Event::Pong => {
                let mut actions = Vec::new();
                if let Some(latency) = self.health.record_pong(now) {
                    actions.push(Action::RecordLatency(latency));
                }
                actions.push(Action::DrainQueue);
                actions
            }
            Event::PongDeadline => {
                if self.health.pong_overdue(now) {
                    let timeout_ms = self.config.pong_timeout.as_millis() as u64;
                    self.on_failure(ErrorClass::Transient, ClientError::PongTimeout { timeout_ms })
                } else {
                    Vec::new()
                }
            }
            Event::Enqueued => vec![Action::DrainQueue],
            Event::DrainTick => vec![
                Action::DrainQueue,
                Action::ScheduleDrainTick {
                    delay: self.config.rate_limit.window,
                    epoch: self.epoch,
                },
            ],
            _ => Vec::new(),
        }
    }

    fn handle_disconnecting(&mut self, event: Event, _now: Instant) -> Vec<Action> {
        match event {
            Event::Close { code, .. } => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.close_code = Some(code);
                }
                self.to_disconnected(None)
            }
            // A failing link during shutdown still means we are done.
            Event::Error(error) => {
                self.to_disconnected(Some(Arc::new(ClientError::Transport(error))))
            }
            _ => Vec::new(),
        }
    }

    fn handle_reconnecting(&mut self, event: Event, now: Instant) -> Vec<Action> {
        match event {
            Event::Retry { attempt } => {
                if self.can_reconnect(attempt) {
                    let Some(ctx) = self.ctx.as_ref() else {
                        return Vec::new();
                    };
                    let url = ctx.url.clone();
                    let protocols = ctx.protocols.clone();
                    let epoch = self.epoch;
                    let previous = self.status;
                    self.status = ConnectionStatus::Connecting;
                    vec![
                        Action::NotifyState(StateChange {
                            previous,
                            current: self.status,
                            cause: None,
                        }),
                        Action::OpenTransport {
                            url,
                            protocols,
                            epoch,
                        },
                        Action::ScheduleConnectDeadline {
                            delay: self.config.connection_timeout,
                            epoch,
                        },
                    ]
                } else {
                    self.give_up(now)
                }
            }
            Event::MaxRetries => self.give_up(now),
            Event::Disconnect { .. } => self.to_disconnected(None),
            _ => Vec::new(),
        }
    }

    // ── Transition helpers ──────────────────────────────────────────

    fn start_connect(&mut self, url: Url, protocols: Vec<String>) -> Vec<Action> {
        self.epoch = self.epoch.next();
        let epoch = self.epoch;
        self.ctx = Some(ConnectionContext::new(url.clone(), protocols.clone(), epoch));
        let previous = self.status;
        self.status = ConnectionStatus::Connecting;
        vec![
            Action::NotifyState(StateChange {
                previous,
                current: self.status,
                cause: None,
            }),
            Action::OpenTransport {
                url,
                protocols,
                epoch,
            },
            Action::ScheduleConnectDeadline {
                delay: self.config.connection_timeout,
                epoch,
            },
        ]
    }

    fn on_open(&mut self, now: Instant) -> Vec<Action> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Vec::new();
        };
        ctx.reconnect_attempts = 0;
        ctx.connected_at = Some(now);
        ctx.last_stable_connection = Some(now);
        self.health.on_open(now);

        let previous = self.status;
        self.status = ConnectionStatus::Connected;
        let epoch = self.epoch;
        vec![
            Action::NotifyState(StateChange {
                previous,
                current: self.status,
                cause: None,
            }),
            Action::SchedulePingDue {
                delay: self.config.ping_interval,
                epoch,
            },
            Action::ScheduleDrainTick {
                delay: self.config.rate_limit.window,
                epoch,
            },
            Action::DrainQueue,
        ]
    }

    /// Common failure path for transport errors, close-triggered failures,
    /// connect timeouts and pong timeouts.
    fn on_failure(&mut self, class: ErrorClass, cause: ClientError) -> Vec<Action> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Vec::new();
        };
        ctx.reconnect_attempts += 1;
        let attempts = ctx.reconnect_attempts;
        let cause = Arc::new(cause);
        ctx.last_error = Some(cause.clone());
        ctx.last_class = Some(class);
        self.health.on_closed();

        let retry_allowed =
            class.is_retryable() && self.config.reconnect && self.config.max_reconnect_attempts > 0;

        if retry_allowed && attempts < self.config.max_reconnect_attempts {
            // Supersede the failed attempt; its timers and link die with
            // the old epoch.
            self.epoch = self.epoch.next();
            let epoch = self.epoch;
            if let Some(ctx) = self.ctx.as_mut() {
                ctx.epoch = epoch;
            }
            let delay = self.scheduler.delay_for(attempts);
            let previous = self.status;
            self.status = ConnectionStatus::Reconnecting;
            vec![
                Action::DropTransport,
                Action::NotifyState(StateChange {
                    previous,
                    current: self.status,
                    cause: Some(cause),
                }),
                Action::ScheduleRetry {
                    delay,
                    attempt: attempts,
                    epoch,
                },
            ]
        } else if retry_allowed {
            // The budget just ran out: the liveness guarantee says this
            // fires exactly once, here.
            self.to_disconnected(Some(Arc::new(ClientError::RetriesExhausted { attempts })))
        } else {
            self.to_disconnected(Some(cause))
        }
    }

    /// Guard for the RETRY transition.
    fn can_reconnect(&self, attempt: u32) -> bool {
        self.config.reconnect
            && attempt <= self.config.max_reconnect_attempts
            && self
                .ctx
                .as_ref()
                .and_then(|c| c.last_class)
                .map_or(true, ErrorClass::is_retryable)
    }

    fn give_up(&mut self, _now: Instant) -> Vec<Action> {
        let attempts = self
            .ctx
            .as_ref()
            .map(|c| c.reconnect_attempts)
            .unwrap_or_default();
        self.to_disconnected(Some(Arc::new(ClientError::RetriesExhausted { attempts })))
    }

    /// Cleanup: discard the context, invalidate every pending timer and
    /// settle in `disconnected`. Idempotent by construction — the epoch
    /// bump makes any late CLOSE-like signal a no-op.
    fn to_disconnected(&mut self, cause: Option<Arc<ClientError>>) -> Vec<Action> {
        let previous = self.status;
        self.status = ConnectionStatus::Disconnected;
        self.epoch = self.epoch.next();
        self.ctx = None;
        self.health.on_closed();
        vec![
            Action::DropTransport,
            Action::NotifyState(StateChange {
                previous,
                current: self.status,
                cause,
            }),
            Action::CompleteDisconnect,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;

    fn test_url() -> Url {
        Url::parse("ws://example.test/socket").unwrap()
    }

    fn connect_event() -> Event {
        Event::Connect {
            url: test_url(),
            protocols: Vec::new(),
        }
    }

    fn recoverable_error() -> Event {
        Event::Error(TransportError::new(
            TransportErrorKind::ConnectionReset,
            "reset",
        ))
    }

    fn machine() -> Machine {
        Machine::new(ClientConfig::default())
    }

    /// Drive a fresh machine into `connected`.
    fn connected_machine() -> Machine {
        let mut m = machine();
        let now = Instant::now();
        m.handle(connect_event(), now);
        m.handle(Event::Open, now);
        assert_eq!(m.status(), ConnectionStatus::Connected);
        m
    }

    fn has_notify_to(actions: &[Action], status: ConnectionStatus) -> bool {
        actions.iter().any(
            |a| matches!(a, Action::NotifyState(change) if change.current == status),
        )
    }

    #[test]
    fn connect_opens_transport_and_arms_deadline() {
        let mut m = machine();
        let actions = m.handle(connect_event(), Instant::now());
        assert_eq!(m.status(), ConnectionStatus::Connecting);
        assert!(has_notify_to(&actions, ConnectionStatus::Connecting));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::OpenTransport { .. })));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ScheduleConnectDeadline { .. })));
    }

    #[test]
    fn open_resets_attempts_and_starts_health() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(connect_event(), now);
        let actions = m.handle(Event::Open, now);

        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert_eq!(m.context().unwrap().reconnect_attempts, 0);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SchedulePingDue { .. })));
        assert!(actions.iter().any(|a| matches!(a, Action::DrainQueue)));
    }

    #[test]
    fn recoverable_error_while_connected_schedules_retry() {
        let mut m = connected_machine();
        let actions = m.handle(recoverable_error(), Instant::now());

        assert_eq!(m.status(), ConnectionStatus::Reconnecting);
        assert_eq!(m.context().unwrap().reconnect_attempts, 1);
        let retry = actions
            .iter()
            .find_map(|a| match a {
                Action::ScheduleRetry { delay, attempt, .. } => Some((*delay, *attempt)),
                _ => None,
            })
            .expect("retry must be scheduled");
        assert_eq!(retry.1, 1);
        assert_eq!(retry.0, Duration::from_millis(1_000));
    }

    #[test]
    fn failure_bumps_epoch_so_stale_timers_die() {
        let mut m = connected_machine();
        let before = m.epoch();
        m.handle(recoverable_error(), Instant::now());
        assert_ne!(m.epoch(), before);
    }

    #[test]
    fn fatal_close_goes_straight_to_disconnected() {
        let mut m = connected_machine();
        let actions = m.handle(
            Event::Close {
                code: 1008,
                reason: "policy".into(),
                was_clean: false,
            },
            Instant::now(),
        );
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        assert!(has_notify_to(&actions, ConnectionStatus::Disconnected));
        // No retry scheduled for a fatal verdict.
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::ScheduleRetry { .. })));
    }

    #[test]
    fn unclean_recoverable_close_reconnects() {
        let mut m = connected_machine();
        m.handle(
            Event::Close {
                code: 1006,
                reason: String::new(),
                was_clean: false,
            },
            Instant::now(),
        );
        assert_eq!(m.status(), ConnectionStatus::Reconnecting);
    }

    #[test]
    fn clean_close_disconnects_without_retry() {
        let mut m = connected_machine();
        m.handle(
            Event::Close {
                code: 1000,
                reason: "bye".into(),
                was_clean: true,
            },
            Instant::now(),
        );
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn retry_budget_exhausts_after_max_attempts() {
        let config = ClientConfig::default().with_max_reconnect_attempts(3);
        let mut m = Machine::new(config);
        let now = Instant::now();
        m.handle(connect_event(), now);
        m.handle(Event::Open, now);

        // Failures 1 and 2 schedule retries; failure 3 exhausts the budget.
        for attempt in 1..3u32 {
            m.handle(recoverable_error(), now);
            assert_eq!(m.status(), ConnectionStatus::Reconnecting);
            assert_eq!(m.context().unwrap().reconnect_attempts, attempt);
            m.handle(Event::Retry { attempt }, now);
            assert_eq!(m.status(), ConnectionStatus::Connecting);
        }
        let actions = m.handle(recoverable_error(), now);
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        let change = actions
            .iter()
            .find_map(|a| match a {
                Action::NotifyState(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            change.cause.as_deref(),
            Some(ClientError::RetriesExhausted { attempts: 3 })
        ));
    }

    #[test]
    fn open_after_retry_resets_the_attempt_counter() {
        let mut m = connected_machine();
        let now = Instant::now();
        m.handle(recoverable_error(), now);
        assert_eq!(m.context().unwrap().reconnect_attempts, 1);
        m.handle(Event::Retry { attempt: 1 }, now);
        m.handle(Event::Open, now);
        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert_eq!(m.context().unwrap().reconnect_attempts, 0);
    }

    #[test]
    fn max_retries_event_terminates_reconnecting() {
        let mut m = connected_machine();
        m.handle(recoverable_error(), Instant::now());
        assert_eq!(m.status(), ConnectionStatus::Reconnecting);
        m.handle(Event::MaxRetries, Instant::now());
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn disconnect_while_connected_closes_gracefully() {
        let mut m = connected_machine();
        let actions = m.handle(
            Event::Disconnect {
                code: 1000,
                reason: "done".into(),
            },
            Instant::now(),
        );
        assert_eq!(m.status(), ConnectionStatus::Disconnecting);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::CloseTransport { code: 1000, .. })));

        let actions = m.handle(
            Event::Close {
                code: 1000,
                reason: String::new(),
                was_clean: true,
            },
            Instant::now(),
        );
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::CompleteDisconnect)));
    }

    #[test]
    fn disconnect_during_backoff_cancels_retry() {
        let mut m = connected_machine();
        m.handle(recoverable_error(), Instant::now());
        let epoch_during_backoff = m.epoch();
        m.handle(
            Event::Disconnect {
                code: 1000,
                reason: String::new(),
            },
            Instant::now(),
        );
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        // The retry timer's epoch is superseded, so its firing is a no-op.
        assert_ne!(m.epoch(), epoch_during_backoff);
    }

    #[test]
    fn connect_timeout_takes_transient_path() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(connect_event(), now);
        let actions = m.handle(Event::ConnectDeadline, now);
        assert_eq!(m.status(), ConnectionStatus::Reconnecting);
        let change = actions
            .iter()
            .find_map(|a| match a {
                Action::NotifyState(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            change.cause.as_deref(),
            Some(ClientError::ConnectTimeout { .. })
        ));
    }

    #[test]
    fn ping_due_sends_and_rearms() {
        let mut m = connected_machine();
        let actions = m.handle(Event::PingDue, Instant::now());
        assert!(actions.iter().any(|a| matches!(a, Action::SendPing)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SchedulePongDeadline { .. })));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SchedulePingDue { .. })));
    }

    #[test]
    fn pong_deadline_without_pong_is_transient_failure() {
        let mut m = connected_machine();
        let t0 = Instant::now();
        m.handle(Event::PingDue, t0);
        let actions = m.handle(Event::PongDeadline, t0 + Duration::from_millis(5_000));
        assert_eq!(m.status(), ConnectionStatus::Reconnecting);
        let change = actions
            .iter()
            .find_map(|a| match a {
                Action::NotifyState(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            change.cause.as_deref(),
            Some(ClientError::PongTimeout { .. })
        ));
    }

    #[test]
    fn pong_in_time_defuses_deadline() {
        let mut m = connected_machine();
        let t0 = Instant::now();
        m.handle(Event::PingDue, t0);
        let actions = m.handle(Event::Pong, t0 + Duration::from_millis(40));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::RecordLatency(d) if *d == Duration::from_millis(40))));
        // Deadline fires but the pong already cleared it.
        let actions = m.handle(Event::PongDeadline, t0 + Duration::from_millis(5_000));
        assert!(actions.is_empty());
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn reconnect_disabled_fails_terminally() {
        let config = ClientConfig::default().with_reconnect(false);
        let mut m = Machine::new(config);
        let now = Instant::now();
        m.handle(connect_event(), now);
        m.handle(Event::Open, now);
        m.handle(recoverable_error(), now);
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn stabilization_is_derived_not_a_state() {
        // Stabilization stays a derived boolean on `connected`, never a
        // sixth machine state.
        let config = ClientConfig::default().with_stability_timeout(Duration::from_millis(100));
        let mut m = Machine::new(config);
        let t0 = Instant::now();
        m.handle(connect_event(), t0);
        m.handle(Event::Open, t0);

        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert!(!m.is_stabilized(t0));
        assert!(m.is_stabilized(t0 + Duration::from_millis(100)));
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn events_ignored_in_irrelevant_states() {
        let mut m = machine();
        let now = Instant::now();
        assert!(m.handle(Event::Open, now).is_empty());
        assert!(m.handle(Event::Pong, now).is_empty());
        assert!(m.handle(Event::Retry { attempt: 1 }, now).is_empty());
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn message_while_connected_notifies() {
        let mut m = connected_machine();
        let actions = m.handle(Event::Message("hello".into()), Instant::now());
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::NotifyMessage(Payload::Text(t)) if t == "hello")));
    }
}
