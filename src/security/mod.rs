//! Admission control.
//!
//! # Data Flow
//! ```text
//! Outbound call attributed to a caller key:
//!     → rate_limit.rs (fixed-window count for the key)
//!     → allowed: continue to the circuit breaker
//!     → rejected: RateLimitedError with retry_after
//! ```
//!
//! # Design Decisions
//! - One limiter per dependency; keys never share counters
//! - Fail closed: a rejected call never reaches breaker or retry

pub mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimitedError, RateLimiter};
