//! Mesh Resilience Library
//!
//! Local-only protection for a mesh node's outbound calls: per-caller rate
//! limiting, a per-dependency circuit breaker, and retries with exponential
//! backoff nested inside the breaker.

pub mod audit;
pub mod config;
pub mod node;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::MeshConfig;
pub use node::{InvokeError, MeshNode, ResilientInvoker};
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};
pub use security::RateLimiter;
