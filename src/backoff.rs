//! Exponential backoff with jitter, for subscriber reconnection loops.
//!
//! Kept separate from the bus core on purpose: none of the bus invariants
//! depend on retry timing. Consumers that lose their subscription (dropped as
//! a slow transient reader, coordinator restart) can use this to pace their
//! re-subscribe attempts.

use rand::Rng;
use std::time::Duration;

/// Backoff policy: `base * factor^attempt`, capped at `max`, plus a random
/// jitter drawn uniformly from `[0, jitter)`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: u32,
    jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 2,
            jitter: Duration::from_millis(1000),
        }
    }

    /// Growth factor per attempt (default 2).
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    /// Upper bound of the random jitter added to every delay (default 1s).
    /// Zero disables jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given retry attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .checked_mul(self.factor.saturating_pow(attempt))
            .unwrap_or(self.max)
            .min(self.max);

        if self.jitter.is_zero() {
            return exp;
        }
        let jitter_ms = rand::rng().random_range(0..self.jitter.as_millis().max(1) as u64);
        exp + Duration::from_millis(jitter_ms)
    }

    /// Endless sequence of delays, one per attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..).map(move |attempt| self.delay(attempt))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}
