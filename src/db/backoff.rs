//! Exponential backoff with jitter for connection retries.

use rand::Rng;
use std::time::Duration;

/// Default upper bound (exclusive) of the random jitter added to each delay
pub const DEFAULT_JITTER: Duration = Duration::from_millis(1000);

/// Delay schedule for attempts within a single `connect()` call.
///
/// `delay(attempt) = min(initial_delay * 2^attempt, max_delay) + jitter`, with
/// jitter drawn independently per call from `[0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    initial_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl BackoffSchedule {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_jitter: DEFAULT_JITTER,
        }
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Capped exponential delay for a zero-indexed attempt, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Delay to wait after the given zero-indexed attempt failed
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_micros() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(0..bound))
    }
}
