//! Reconnection backoff
//!
//! Delay for attempt `n` (0-based) is `min(initial * 2^n, max)`. The attempt
//! counter only resets on an explicit [`Backoff::reset`], which the duplex
//! client calls after a successful open.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff bounds (milliseconds)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First delay
    pub initial_ms: u64,
    /// Delay cap
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 4000,
        }
    }
}

/// Exponential backoff calculator
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a calculator with zero attempts
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempts: 0,
        }
    }

    /// Delay for the next attempt; increments the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self
            .initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max));
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failed cycles since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_ms),
            Duration::from_millis(config.max_ms),
        )
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}
