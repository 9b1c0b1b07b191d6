//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failed action up to `max_attempts` times in total
//! - Wait an exponentially growing, capped delay between attempts
//! - Surface the last error unchanged once attempts run out
//!
//! # Design Decisions
//! - Every error is retryable; classification belongs to the action
//! - Delays go through the injected `Sleeper`, never a blocking sleep
//! - No early abort: a started loop runs to success or exhaustion

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::clock::Sleeper;

/// Bounded-attempt exponential backoff wrapper.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    dependency: String,
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(
        dependency: impl Into<String>,
        config: RetryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            sleeper,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.config.initial_delay_ms,
            self.config.max_delay_ms,
            self.config.backoff_multiplier,
        )
    }

    /// Run `action` until it succeeds or `max_attempts` is reached.
    pub async fn execute<T, E, F, Fut>(&self, mut action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match action().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            dependency = %self.dependency,
                            attempt,
                            "Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::info!(
                        dependency = %self.dependency,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Retrying call"
                    );
                    metrics::record_retry(&self.dependency);
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if max_attempts > 1 {
                        tracing::warn!(
                            dependency = %self.dependency,
                            attempts = attempt,
                            error = %e,
                            "Retries exhausted"
                        );
                        metrics::record_retries_exhausted(&self.dependency);
                    }
                    return Err(e);
                }
            }
        }
    }
}
