//! Client observability counters.
//!
//! Lock-free counters for traffic accounting plus small bounded rings of
//! recent errors and latencies for runtime inspection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Recent errors kept for inspection.
const ERROR_SAMPLES: usize = 16;
/// Recent latency samples kept for inspection.
const LATENCY_SAMPLES: usize = 32;

/// Counters and recent-event rings for one client.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    reconnects: AtomicU64,
    queue_rejections: AtomicU64,
    messages_expired: AtomicU64,
    recent_errors: Mutex<VecDeque<String>>,
    recent_latencies: Mutex<VecDeque<Duration>>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `Arc<ClientMetrics>` for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_rejection(&self) {
        self.queue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.messages_expired
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let mut ring = self.recent_errors.lock();
        if ring.len() == ERROR_SAMPLES {
            ring.pop_front();
        }
        ring.push_back(error.into());
    }

    pub fn record_latency(&self, latency: Duration) {
        let mut ring = self.recent_latencies.lock();
        if ring.len() == LATENCY_SAMPLES {
            ring.pop_front();
        }
        ring.push_back(latency);
    }

    /// Point-in-time copy of all counters and rings.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            messages_expired: self.messages_expired.load(Ordering::Relaxed),
            recent_errors: self.recent_errors.lock().iter().cloned().collect(),
            recent_latencies: self.recent_latencies.lock().iter().copied().collect(),
        }
    }
}

/// Point-in-time view of [`ClientMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnects: u64,
    pub queue_rejections: u64,
    pub messages_expired: u64,
    pub recent_errors: Vec<String>,
    pub recent_latencies: Vec<Duration>,
}
