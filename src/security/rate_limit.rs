//! Fixed-window rate limiting per client key.
//!
//! Windows are created lazily and never evicted, so memory grows with the
//! number of distinct keys seen. `tracked_keys` exposes that growth.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::resilience::clock::Clock;

/// Counter for one key's current window.
#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    window_start: Instant,
    count: u32,
}

impl RateLimitWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }
}

/// Result of a limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window ends; set only when rejected.
    pub retry_after: Option<Duration>,
}

/// The limiter refused the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit exceeded for '{caller}', retry after {}ms", .retry_after.as_millis())]
pub struct RateLimitedError {
    pub caller: String,
    pub retry_after: Duration,
}

/// Per-key fixed-window request counter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateLimitWindow>,
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests: config.max_requests,
            window: config.window(),
            clock,
        }
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub fn check_limit(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now();

        // The entry guard holds the shard lock, making check-and-increment atomic per key.
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow::new(now));

        let elapsed = now.saturating_duration_since(entry.window_start);
        if elapsed >= self.window {
            *entry = RateLimitWindow::new(now);
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count <= self.max_requests {
            RateLimitDecision {
                allowed: true,
                remaining: self.max_requests - entry.count,
                retry_after: None,
            }
        } else {
            let elapsed = now.saturating_duration_since(entry.window_start);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(self.window.saturating_sub(elapsed)),
            }
        }
    }

    /// Number of keys with a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
