//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MeshConfig (validated, immutable)
//!     → one ResilienceConfig handed to each dependency at node startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breakers and limiters never see a change
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, DependencyConfig, MeshConfig, ObservabilityConfig, RateLimitConfig,
    ResilienceConfig, RetryConfig,
};
