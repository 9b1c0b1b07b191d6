//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency (after rate limiting):
//!     → circuit_breaker.rs (fail fast if open, one probe if half-open)
//!     → retry.rs (run action, back off and retry on failure)
//!         → backoff.rs (delay arithmetic)
//!         → clock.rs (non-blocking sleep)
//!     → circuit_breaker.rs (record one outcome for the whole retry loop)
//! ```
//!
//! # Design Decisions
//! - Retries nest inside one breaker attempt, so a flaky call that recovers
//!   never trips the breaker on its own
//! - Time is injected (`Clock`, `Sleeper`) so timing is testable

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod retry;

pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitOpenError, CircuitState,
};
pub use clock::{Clock, ManualClock, MonotonicClock, Sleeper, TokioSleeper};
pub use retry::RetryPolicy;
