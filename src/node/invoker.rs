//! Resilient invocation of one dependency.
//!
//! # Responsibilities
//! - Check the caller's rate limit before anything else
//! - Run the action under the breaker, with retries nested inside
//! - Emit audit events for blocks and connection attempts
//!
//! # Design Decisions
//! - A whole retry loop is one breaker outcome
//! - The retry loop is not interrupted if the breaker trips meanwhile;
//!   other callers see the open circuit, this one finishes its attempts

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audit::{AuditEventKind, Auditor};
use crate::config::ResilienceConfig;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker, CircuitOpenError};
use crate::resilience::clock::{saturating_millis, Clock, Sleeper};
use crate::resilience::retry::RetryPolicy;
use crate::security::rate_limit::{RateLimitedError, RateLimiter};

/// Why a resilient call did not produce a value.
#[derive(Debug, Error)]
pub enum InvokeError<E> {
    #[error(transparent)]
    RateLimited(#[from] RateLimitedError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("unknown dependency '{0}'")]
    UnknownDependency(String),

    /// Terminal error of the exhausted retry loop, unchanged.
    #[error("{0}")]
    Action(E),
}

impl<E> InvokeError<E> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, InvokeError::RateLimited(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, InvokeError::CircuitOpen(_))
    }

    /// Suggested wait before calling again, when the limiter refused.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            InvokeError::RateLimited(e) => Some(e.retry_after),
            _ => None,
        }
    }

    pub fn into_action(self) -> Option<E> {
        match self {
            InvokeError::Action(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<BreakerError<E>> for InvokeError<E> {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open(e) => InvokeError::CircuitOpen(e),
            BreakerError::Action(e) => InvokeError::Action(e),
        }
    }
}

/// Rate limiter, circuit breaker and retry policy for one dependency.
#[derive(Debug)]
pub struct ResilientInvoker {
    dependency: String,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    auditor: Auditor,
}

impl ResilientInvoker {
    pub fn new(
        dependency: impl Into<String>,
        config: &ResilienceConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        auditor: Auditor,
    ) -> Self {
        let dependency = dependency.into();
        Self {
            limiter: RateLimiter::new(&config.rate_limit, clock.clone()),
            breaker: CircuitBreaker::new(
                dependency.clone(),
                config.circuit_breaker.clone(),
                clock,
                auditor.clone(),
            ),
            retry: RetryPolicy::new(dependency.clone(), config.retry.clone(), sleeper),
            auditor,
            dependency,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Call the dependency on behalf of `caller`.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        caller: &str,
        mut action: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let decision = self.limiter.check_limit(caller);
        metrics::record_rate_limit(&self.dependency, decision.allowed, self.limiter.tracked_keys());

        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or_default();
            let retry_after_ms = saturating_millis(retry_after);
            tracing::warn!(
                dependency = %self.dependency,
                caller = %caller,
                retry_after_ms,
                "Rate limit exceeded"
            );
            self.auditor.emit(AuditEventKind::RateLimitBlocked {
                dependency: self.dependency.clone(),
                caller: caller.to_string(),
                retry_after_ms,
            });
            return Err(RateLimitedError {
                caller: caller.to_string(),
                retry_after,
            }
            .into());
        }

        let auditor = &self.auditor;
        let dependency = &self.dependency;
        let attempt = || {
            auditor.emit(AuditEventKind::ConnectionAttempt {
                dependency: dependency.clone(),
                caller: caller.to_string(),
            });
            action()
        };

        let retry = &self.retry;
        self.breaker
            .execute(move || retry.execute(attempt))
            .await
            .map_err(InvokeError::from)
    }
}
