//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retries and limiters produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! Audit events are a separate, injected sink; see `crate::audit`.

pub mod logging;
pub mod metrics;
