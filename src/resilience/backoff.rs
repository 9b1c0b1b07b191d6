//! Exponential backoff.

use std::time::Duration;

/// Calculate the delay to wait after a failed `attempt` (1-based).
///
/// `initial_ms * multiplier^(attempt - 1)`, capped at `max_ms`. Saturates
/// instead of overflowing for large attempt counts.
pub fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_ms = initial_ms as f64 * multiplier.powi(exponent);

    let capped = if !delay_ms.is_finite() || delay_ms >= max_ms as f64 {
        max_ms
    } else {
        delay_ms as u64
    };

    Duration::from_millis(capped)
}
