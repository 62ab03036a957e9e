//! Linear backoff for failed connect exchanges.
//!
//! Bayeux prescribes additive backoff: each consecutive connect failure adds
//! a fixed increment to the pause before the next attempt, up to a cap. Only
//! the connect exchange mutates the backoff; handshake and publish failures
//! leave it untouched, so an unrelated request error never slows the
//! long-poll loop down.

use core::time::Duration;

/// Additive backoff, capped at a maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    increment: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Backoff that grows by `increment` per failure, capped at `max`.
    #[must_use]
    pub const fn new(increment: Duration, max: Duration) -> Self {
        Self {
            increment,
            max,
            current: Duration::ZERO,
        }
    }

    /// The pause before the next attempt. Zero while healthy.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure: grow the pause by one increment, up to the cap,
    /// and return the new pause.
    pub fn increase(&mut self) -> Duration {
        self.current = self.max.min(self.current + self.increment);
        self.current
    }

    /// Record a success: the next attempt proceeds without delay.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

impl Default for Backoff {
    /// One second per failure, capped at thirty seconds.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
