//! Admission Rate Limiting
//!
//! Token-bucket admission control keyed per client identity.
//!
//! # Design
//!
//! Each key owns a bucket holding up to `limit` tokens:
//! - A new key starts with a full bucket
//! - Every whole refill window elapsed since the bucket's last check restores
//!   `limit` tokens, capped at `limit`
//! - Every check, admitted or rejected, restarts the bucket clock at `now`
//! - Each admitted check consumes one token; an empty bucket rejects without
//!   changing the count
//!
//! A client that keeps knocking on an empty bucket therefore keeps it empty:
//! the next refill comes one full window after its last attempt.
//!
//! Buckets live in a [`DashMap`]; a check holds the key's shard entry for the
//! whole read-refill-consume step, so concurrent checks on one key cannot
//! double-spend and checks on different keys do not interfere.
//!
//! # Usage
//!
//! ```
//! use relay_core::transport::rate_limit::{RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new()
//!         .with_limit(5)
//!         .with_refill_window(Duration::from_secs(30)),
//! );
//!
//! assert!(limiter.check("alice").is_allowed());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Configuration
// =============================================================================

/// Default tokens per bucket
pub const DEFAULT_LIMIT: u32 = 10;

/// Default refill window (milliseconds)
pub const DEFAULT_REFILL_MS: u64 = 60_000;

/// Configuration for admission rate limiting
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity, and tokens restored per refill window
    pub limit: u32,

    /// Refill window (milliseconds)
    pub refill_ms: u64,

    /// Whether to enable rate limiting (can be disabled for testing)
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            refill_ms: DEFAULT_REFILL_MS,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bucket capacity
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the refill window
    #[must_use]
    pub fn with_refill_window(mut self, window: Duration) -> Self {
        self.refill_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable rate limiting
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Create a disabled configuration (for testing)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Refill window as a duration
    #[must_use]
    pub fn refill_window(&self) -> Duration {
        Duration::from_millis(self.refill_ms)
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors related to rate limiting
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// The key's bucket is empty
    #[error("Rate limit exceeded for {key} (limit: {limit}, retry after {retry_after:?})")]
    Exhausted {
        /// Client identity
        key: String,
        /// Configured bucket capacity
        limit: u32,
        /// Time until the next refill
        retry_after: Duration,
    },
}

/// Result of a rate limit check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request admitted
    Allowed {
        /// Tokens left after this request (`u32::MAX` when disabled)
        remaining: u32,
    },

    /// Request rejected
    Rejected {
        /// The reason for rejection
        error: RateLimitError,
    },
}

impl RateLimitResult {
    /// Check if the request was admitted
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Check if the request was rejected
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Time until the bucket refills, for rejected requests
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rejected {
                error: RateLimitError::Exhausted { retry_after, .. },
            } => Some(*retry_after),
            Self::Allowed { .. } => None,
        }
    }
}

// =============================================================================
// Bucket
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct RateBucket {
    tokens: u32,
    updated_at: Instant,
}

impl RateBucket {
    fn full(limit: u32, now: Instant) -> Self {
        Self {
            tokens: limit,
            updated_at: now,
        }
    }

    /// Pay out whole windows elapsed since the last check, then restart the clock
    fn refill(&mut self, limit: u32, window: Duration, now: Instant) {
        let elapsed = now.saturating_duration_since(self.updated_at);
        self.updated_at = now;

        if window.is_zero() {
            self.tokens = limit;
            return;
        }

        let windows = elapsed.as_nanos() / window.as_nanos();
        if windows == 0 {
            return;
        }

        let added = u128::from(limit).saturating_mul(windows);
        self.tokens = u128::from(self.tokens)
            .saturating_add(added)
            .min(u128::from(limit)) as u32;
    }

    fn retry_after(&self, window: Duration, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.updated_at);
        window.saturating_sub(elapsed)
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Keyed token-bucket rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, RateBucket>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and consume one token for `key`
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    /// Check and consume one token for `key` at an explicit instant
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
            };
        }

        let limit = self.config.limit;
        let window = self.config.refill_window();

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::full(limit, now));
        bucket.refill(limit, window, now);

        if bucket.tokens == 0 {
            let retry_after = bucket.retry_after(window, now);
            drop(bucket);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                key = %key,
                limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return RateLimitResult::Rejected {
                error: RateLimitError::Exhausted {
                    key: key.to_string(),
                    limit,
                    retry_after,
                },
            };
        }

        bucket.tokens -= 1;
        let remaining = bucket.tokens;
        drop(bucket);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        RateLimitResult::Allowed { remaining }
    }

    /// Tokens currently available to `key` (full if unseen)
    #[must_use]
    pub fn available_tokens(&self, key: &str) -> u32 {
        self.buckets
            .get(key)
            .map_or(self.config.limit, |bucket| bucket.tokens)
    }

    /// Drop buckets not checked for longer than `older_than`
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self, older_than: Duration) -> usize {
        self.evict_idle_at(older_than, Instant::now())
    }

    /// Drop idle buckets relative to an explicit instant
    pub fn evict_idle_at(&self, older_than: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.updated_at) <= older_than);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "Evicted idle rate limit buckets");
        }
        removed
    }

    /// Number of tracked keys
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Get aggregate metrics
    #[must_use]
    pub fn metrics(&self) -> RateLimitMetrics {
        RateLimitMetrics {
            tracked_keys: self.tracked_keys(),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Remove all buckets (useful for testing)
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Aggregate metrics for the rate limiter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitMetrics {
    /// Keys with a live bucket
    pub tracked_keys: usize,
    /// Checks admitted
    pub admitted: u64,
    /// Checks rejected
    pub rejected: u64,
}

// =============================================================================
// Tests
// =============================================================================
