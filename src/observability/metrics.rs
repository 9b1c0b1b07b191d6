//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_breaker_transitions_total` (counter): by dependency, from, to
//! - `resilience_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `resilience_breaker_rejections_total` (counter): calls refused while open
//! - `resilience_retries_total` (counter): retry attempts scheduled
//! - `resilience_retries_exhausted_total` (counter): retry loops that gave up
//! - `resilience_rate_limit_decisions_total` (counter): by dependency, outcome
//! - `resilience_rate_limit_tracked_keys` (gauge): windows held per limiter
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed every call is a no-op
//! - Prometheus exporter is opt-in from the binary

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_breaker_transition(dependency: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "resilience_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);

    let value = match to {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    metrics::gauge!("resilience_breaker_state", "dependency" => dependency.to_string()).set(value);
}

pub fn record_breaker_rejection(dependency: &str) {
    metrics::counter!("resilience_breaker_rejections_total", "dependency" => dependency.to_string())
        .increment(1);
}

pub fn record_retry(dependency: &str) {
    metrics::counter!("resilience_retries_total", "dependency" => dependency.to_string())
        .increment(1);
}

pub fn record_retries_exhausted(dependency: &str) {
    metrics::counter!("resilience_retries_exhausted_total", "dependency" => dependency.to_string())
        .increment(1);
}

pub fn record_rate_limit(dependency: &str, allowed: bool, tracked_keys: usize) {
    let outcome = if allowed { "allowed" } else { "limited" };
    metrics::counter!(
        "resilience_rate_limit_decisions_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::gauge!("resilience_rate_limit_tracked_keys", "dependency" => dependency.to_string())
        .set(tracked_keys as f64);
}
