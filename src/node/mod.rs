//! Outbound call protection for a mesh node.
//!
//! # Data Flow
//! ```text
//! MeshNode::invoke(dependency, caller, action)
//!     → registry.rs (look up the dependency's invoker)
//!     → invoker.rs
//!         → security::rate_limit (per-caller window)
//!         → resilience::circuit_breaker (per-dependency state machine)
//!             → resilience::retry (backoff loop around the action)
//! ```
//!
//! # Design Decisions
//! - The node owns an explicit map; there are no global singletons
//! - Each dependency gets its own limiter, breaker and retry policy

pub mod invoker;
pub mod registry;

pub use invoker::{InvokeError, ResilientInvoker};
pub use registry::MeshNode;
