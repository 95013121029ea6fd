//! Client configuration.

use std::time::Duration;

/// Outbound rate limit: at most `messages` sends per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub messages: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            messages: 100,
            window: Duration::from_millis(1_000),
        }
    }
}

/// Configuration for a [`Client`](crate::client::Client).
///
/// All fields have defaults; use the `with_*` methods to override.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use resock_core::ClientConfig;
///
/// let config = ClientConfig::default()
///     .with_max_reconnect_attempts(3)
///     .with_reconnect_interval(Duration::from_millis(500))
///     .with_message_queue_size(64);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect automatically after recoverable failures (default: true).
    pub reconnect: bool,
    /// Consecutive failures before giving up (default: 5).
    pub max_reconnect_attempts: u32,
    /// Base backoff delay (default: 1s).
    pub reconnect_interval: Duration,
    /// Multiplier applied per attempt (default: 1.5).
    pub reconnect_backoff_rate: f64,
    /// Upper bound on the backoff delay (default: 30s).
    pub max_reconnect_delay: Duration,
    /// Jitter as a fraction of the computed delay, 0.0..=1.0 (default: 0.0).
    pub jitter_factor: f64,
    /// Deadline for the transport to open (default: 30s).
    pub connection_timeout: Duration,
    /// Interval between heartbeat pings (default: 30s).
    pub ping_interval: Duration,
    /// Deadline for a pong after each ping (default: 5s).
    pub pong_timeout: Duration,
    /// Uptime after which a session counts as stable (default: 10s).
    pub stability_timeout: Duration,
    /// Outbound queue capacity across both priority classes (default: 100).
    pub message_queue_size: usize,
    /// Default time-to-live for queued messages (default: 5s).
    pub message_timeout: Duration,
    /// Outbound rate limit (default: 100 messages per second).
    pub rate_limit: RateLimit,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(1_000),
            reconnect_backoff_rate: 1.5,
            max_reconnect_delay: Duration::from_millis(30_000),
            jitter_factor: 0.0,
            connection_timeout: Duration::from_millis(30_000),
            ping_interval: Duration::from_millis(30_000),
            pong_timeout: Duration::from_millis(5_000),
            stability_timeout: Duration::from_millis(10_000),
            message_queue_size: 100,
            message_timeout: Duration::from_millis(5_000),
            rate_limit: RateLimit::default(),
        }
    }
}

impl ClientConfig {
    /// Enable or disable automatic reconnection (default: `true`).
    pub fn with_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }

    /// Set the number of consecutive failures tolerated before giving up.
    pub fn with_max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = max;
        self
    }

    /// Set the base backoff delay.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the backoff multiplier applied per attempt.
    pub fn with_reconnect_backoff_rate(mut self, rate: f64) -> Self {
        self.reconnect_backoff_rate = rate;
        self
    }

    /// Set the upper bound on the backoff delay.
    pub fn with_max_reconnect_delay(mut self, max: Duration) -> Self {
        self.max_reconnect_delay = max;
        self
    }

    /// Set backoff jitter as a fraction of the computed delay (0.0..=1.0).
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the deadline for the transport to open.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the heartbeat ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the pong deadline.
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Set the uptime threshold after which a session counts as stable.
    pub fn with_stability_timeout(mut self, timeout: Duration) -> Self {
        self.stability_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_message_queue_size(mut self, size: usize) -> Self {
        self.message_queue_size = size;
        self
    }

    /// Set the default time-to-live for queued messages.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Set the outbound rate limit.
    pub fn with_rate_limit(mut self, messages: u32, window: Duration) -> Self {
        self.rate_limit = RateLimit { messages, window };
        self
    }
}
