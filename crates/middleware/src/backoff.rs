//! Reconnect delay schedule shared by websocket sessions and durable publishers.

use std::time::Duration;

pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff: starts at `base`, doubles per consecutive failure,
/// never exceeds `cap`. Call [`Backoff::reset`] after a successful attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let cap = cap.max(base);
        Self {
            base,
            cap,
            current: base,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Stateless form for callbacks that only see an attempt counter (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << shift).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CAP)
    }
}
