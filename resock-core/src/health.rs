//! Connection health monitoring.
//!
//! Tracks the ping/pong heartbeat, a bounded latency sample buffer and
//! session stability. The monitor holds no timers of its own; the
//! dispatcher arms them and feeds the resulting events back in.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Latency samples kept for inspection.
const LATENCY_SAMPLES: usize = 32;

/// Heartbeat and stability tracking for one client.
///
/// Stability is a derived property of `connected`, not a machine state: a
/// session counts as stable once its uptime exceeds `stability_timeout`.
#[derive(Debug)]
pub struct HealthMonitor {
    pong_timeout: Duration,
    stability_timeout: Duration,
    connected_at: Option<Instant>,
    last_ping_sent: Option<Instant>,
    awaiting_pong: bool,
    latencies: VecDeque<Duration>,
}

impl HealthMonitor {
    pub fn new(pong_timeout: Duration, stability_timeout: Duration) -> Self {
        Self {
            pong_timeout,
            stability_timeout,
            connected_at: None,
            last_ping_sent: None,
            awaiting_pong: false,
            latencies: VecDeque::with_capacity(LATENCY_SAMPLES),
        }
    }

    /// Reset for a freshly opened connection.
    pub fn on_open(&mut self, now: Instant) {
        self.connected_at = Some(now);
        self.last_ping_sent = None;
        self.awaiting_pong = false;
    }

    /// The connection is gone; heartbeat state no longer applies.
    pub fn on_closed(&mut self) {
        self.connected_at = None;
        self.last_ping_sent = None;
        self.awaiting_pong = false;
    }

    /// A ping is about to go out. Returns false when one is still
    /// outstanding, in which case the caller must not send another.
    pub fn record_ping(&mut self, now: Instant) -> bool {
        if self.awaiting_pong {
            return false;
        }
        self.last_ping_sent = Some(now);
        self.awaiting_pong = true;
        true
    }

    /// A pong arrived; returns the round-trip latency of the matching ping.
    pub fn record_pong(&mut self, now: Instant) -> Option<Duration> {
        if !self.awaiting_pong {
            return None; // unsolicited pong
        }
        self.awaiting_pong = false;
        let sent = self.last_ping_sent?;
        let latency = now.duration_since(sent);
        if self.latencies.len() == LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        Some(latency)
    }

    /// True when the outstanding ping has gone unanswered past the pong
    /// deadline.
    pub fn pong_overdue(&self, now: Instant) -> bool {
        match (self.awaiting_pong, self.last_ping_sent) {
            (true, Some(sent)) => now.duration_since(sent) >= self.pong_timeout,
            _ => false,
        }
    }

    /// True once uptime since the last open exceeds the stability threshold.
    pub fn is_stabilized(&self, now: Instant) -> bool {
        match self.connected_at {
            Some(opened) => now.duration_since(opened) >= self.stability_timeout,
            None => false,
        }
    }

    /// Mean of the recorded latency samples.
    pub fn mean_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    /// Most recent latency sample.
    pub fn last_latency(&self) -> Option<Duration> {
        self.latencies.back().copied()
    }
}
