//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0, multiplier >= 1)
//! - Detect duplicate dependency names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeshConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{MeshConfig, ResilienceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("dependency name must not be empty")]
    EmptyName,

    #[error("dependency '{0}' is defined more than once")]
    DuplicateDependency(String),

    #[error("dependency '{dependency}': {field} must be greater than zero")]
    MustBePositive {
        dependency: String,
        field: &'static str,
    },

    #[error("dependency '{0}': backoff_multiplier must be a finite number >= 1.0")]
    InvalidMultiplier(String),

    #[error("dependency '{0}': max_delay_ms must not be below initial_delay_ms")]
    DelayBounds(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for dep in &config.dependencies {
        if dep.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName);
        } else if !seen.insert(dep.name.as_str()) {
            errors.push(ValidationError::DuplicateDependency(dep.name.clone()));
        }
        validate_resilience(&dep.name, &dep.resilience, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_resilience(name: &str, config: &ResilienceConfig, errors: &mut Vec<ValidationError>) {
    let positive = [
        ("failure_threshold", config.circuit_breaker.failure_threshold as u64),
        ("success_threshold", config.circuit_breaker.success_threshold as u64),
        ("max_attempts", config.retry.max_attempts as u64),
        ("max_requests", config.rate_limit.max_requests as u64),
        ("window_ms", config.rate_limit.window_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive {
                dependency: name.to_string(),
                field,
            });
        }
    }

    let multiplier = config.retry.backoff_multiplier;
    if !multiplier.is_finite() || multiplier < 1.0 {
        errors.push(ValidationError::InvalidMultiplier(name.to_string()));
    }

    if config.retry.max_delay_ms < config.retry.initial_delay_ms {
        errors.push(ValidationError::DelayBounds(name.to_string()));
    }
}
