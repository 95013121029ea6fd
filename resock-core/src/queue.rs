//! Bounded, priority-aware outbound message queue with rate limiting.
//!
//! Two FIFO classes share one capacity. Normal-priority enqueues are
//! rejected at capacity; high-priority enqueues evict the oldest normal
//! entry instead. Draining is gated by [`RateWindow`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::RateLimit;
use crate::error::{ClientError, ClientResult};
use crate::transport::Payload;

// ════════════════════════════════════════════════════════════════════
// Message types
// ════════════════════════════════════════════════════════════════════

/// Priority class of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Identifier handed back by `send()`; unique per client for the process
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One queued outbound message.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub payload: Payload,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub attempts: u32,
    /// Instant past which the message expires instead of being sent.
    pub deadline: Option<Instant>,
}

/// Result of a successful enqueue.
///
/// `evicted` carries the normal-priority entry displaced by a high-priority
/// enqueue at capacity, so the caller can surface the drop; it is never
/// silently discarded.
#[derive(Debug)]
pub struct EnqueueReceipt {
    pub id: MessageId,
    pub evicted: Option<QueuedMessage>,
}

// ════════════════════════════════════════════════════════════════════
// Queue
// ════════════════════════════════════════════════════════════════════

/// Bounded two-class FIFO for outbound messages.
#[derive(Debug)]
pub struct MessageQueue {
    high: VecDeque<QueuedMessage>,
    normal: VecDeque<QueuedMessage>,
    capacity: usize,
    next_id: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            capacity,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message to its priority class.
    ///
    /// At capacity, a `Normal` enqueue fails with `QueueFull`; a `High`
    /// enqueue evicts the oldest normal entry instead. A `High` enqueue
    /// with no normal entry to evict also fails — capacity is a hard bound.
    pub fn enqueue(
        &mut self,
        payload: Payload,
        priority: Priority,
        deadline: Option<Instant>,
        now: Instant,
    ) -> ClientResult<EnqueueReceipt> {
        let mut evicted = None;
        if self.len() >= self.capacity {
            match priority {
                Priority::Normal => return Err(ClientError::queue_full(self.capacity)),
                Priority::High => {
                    evicted = self.normal.pop_front();
                    if evicted.is_none() {
                        return Err(ClientError::queue_full(self.capacity));
                    }
                }
            }
        }

        self.next_id += 1;
        let id = MessageId(self.next_id);
        let message = QueuedMessage {
            id,
            payload,
            priority,
            enqueued_at: now,
            attempts: 0,
            deadline,
        };
        match priority {
            Priority::High => self.high.push_back(message),
            Priority::Normal => self.normal.push_back(message),
        }
        Ok(EnqueueReceipt { id, evicted })
    }

    /// Remove and return the next message: head of the high class first,
    /// else FIFO head of the normal class. Marks the dispatch attempt.
    pub fn dequeue(&mut self) -> Option<QueuedMessage> {
        let mut message = self.high.pop_front().or_else(|| self.normal.pop_front())?;
        message.attempts += 1;
        Some(message)
    }

    /// Purge entries whose deadline has passed and return them for
    /// surfacing.
    pub fn expire(&mut self, now: Instant) -> Vec<QueuedMessage> {
        let mut expired = Vec::new();
        for class in [&mut self.high, &mut self.normal] {
            class.retain(|m| match m.deadline {
                Some(deadline) if now >= deadline => {
                    expired.push(m.clone());
                    false
                }
                _ => true,
            });
        }
        expired
    }

    /// Drop everything; returns how many entries were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.high.clear();
        self.normal.clear();
        dropped
    }
}

// ════════════════════════════════════════════════════════════════════
// Rate window
// ════════════════════════════════════════════════════════════════════

/// Fixed-window rate limiter for outbound sends.
///
/// The count is monotonic within a window and resets in one step when the
/// window boundary passes.
#[derive(Debug)]
pub struct RateWindow {
    window_start: Instant,
    count: u32,
    limit: u32,
    window: Duration,
}

impl RateWindow {
    pub fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            limit: limit.messages,
            window: limit.window,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
    }

    /// True when another send is allowed right now.
    pub fn check(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.count < self.limit
    }

    /// Claim one send slot; returns false when the window is exhausted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Time until the current window resets.
    pub fn until_reset(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.duration_since(self.window_start))
    }
}
