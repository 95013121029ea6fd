//! Reconnection backoff computation.
//!
//! The scheduler computes delays; arming the actual timer is the
//! dispatcher's job, so this stays free of I/O and clocks apart from the
//! jitter seed.

use std::time::Duration;

use crate::config::ClientConfig;

/// Computes exponential backoff delays for reconnection attempts.
///
/// `delay = min(base × rate^(attempt − 1), max_delay)`, with optional
/// jitter of ±`jitter_factor` applied on top. Attempt numbers start at 1.
#[derive(Debug)]
pub struct ReconnectScheduler {
    base: Duration,
    rate: f64,
    max_delay: Duration,
    jitter_factor: f64,
    rng_state: u64,
}

impl ReconnectScheduler {
    pub fn new(config: &ClientConfig) -> Self {
        // Seed from the wall clock; quality is irrelevant, distinctness
        // across processes is what prevents synchronized retry storms.
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9)
            | 1;
        Self {
            base: config.reconnect_interval,
            rate: config.reconnect_backoff_rate,
            max_delay: config.max_reconnect_delay,
            jitter_factor: config.jitter_factor,
            rng_state: seed,
        }
    }

    /// Delay before reconnection attempt number `attempt` (1-based).
    pub fn delay_for(&mut self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.base.as_millis() as f64 * self.rate.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64);

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(capped as u64);
        }

        let jitter = (self.next_random() * 2.0 - 1.0) * capped * self.jitter_factor;
        let jittered = (capped + jitter).max(self.base.as_millis() as f64);
        Duration::from_millis(jittered.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// xorshift64; fast and good enough for retry jitter.
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }
}
