//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after timeout has elapsed
//! Half-Open → Closed: consecutive probe successes >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global)
//! - Fail fast in Open state; the action is never invoked
//! - Single probe in Half-Open; concurrent callers are rejected as if open
//! - State lives behind one mutex per breaker, never held across `.await`

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::audit::{AuditEventKind, Auditor};
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::clock::{saturating_millis, Clock};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The breaker refused the call without running it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for dependency '{dependency}'")]
pub struct CircuitOpenError {
    pub dependency: String,
}

/// Outcome of [`CircuitBreaker::execute`] when it does not succeed.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The action ran and failed; its error is passed through untouched.
    #[error("{0}")]
    Action(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// The action's error, if the action ran.
    pub fn into_action(self) -> Option<E> {
        match self {
            BreakerError::Action(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the breaker last opened (open / half-open only).
    pub open_for_ms: Option<u64>,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// Id of the probe currently allowed through in half-open.
    probe: Option<u64>,
    next_probe_id: u64,
}

/// Circuit breaker guarding one downstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    auditor: Auditor,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        auditor: Auditor,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            clock,
            auditor,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe: None,
                next_probe_id: 0,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Current state. Does not evaluate the open timeout.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.lock().consecutive_successes
    }

    /// When the breaker last opened, if it is open or half-open.
    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            open_for_ms: inner
                .opened_at
                .map(|at| saturating_millis(now.saturating_duration_since(at))),
            probe_in_flight: inner.probe.is_some(),
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        tracing::info!(
            dependency = %self.dependency,
            old_state = %inner.state,
            "Circuit breaker reset"
        );
        self.transition(&mut inner, CircuitState::Closed);
    }

    /// Run `action` if the breaker allows it, recording the outcome.
    pub async fn execute<T, E, F, Fut>(&self, action: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.acquire()?;
        let result = action().await;
        permit.settle(result.is_ok());
        result.map_err(BreakerError::Action)
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::MAX);
            if elapsed >= self.config.timeout() {
                tracing::info!(
                    dependency = %self.dependency,
                    open_for_ms = saturating_millis(elapsed),
                    "Circuit breaker half-open, probing dependency"
                );
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Permit::new(self, None)),
            CircuitState::HalfOpen if inner.probe.is_none() => {
                let id = inner.next_probe_id;
                inner.next_probe_id = inner.next_probe_id.wrapping_add(1);
                inner.probe = Some(id);
                Ok(Permit::new(self, Some(id)))
            }
            state => {
                tracing::debug!(
                    dependency = %self.dependency,
                    state = %state,
                    "Circuit breaker rejected call"
                );
                metrics::record_breaker_rejection(&self.dependency);
                Err(CircuitOpenError {
                    dependency: self.dependency.clone(),
                })
            }
        }
    }

    fn on_success(&self, probe: Option<u64>) {
        let mut inner = self.lock();
        let is_probe = probe.is_some() && inner.probe == probe;
        if is_probe {
            inner.probe = None;
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if is_probe => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    tracing::info!(
                        dependency = %self.dependency,
                        successes = inner.consecutive_successes,
                        "Circuit breaker closing after successful recovery"
                    );
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Late result from a call admitted before the circuit tripped.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: Option<u64>) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if probe.is_some() && inner.probe == probe {
            inner.probe = None;
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        dependency = %self.dependency,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening due to failures"
                    );
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    dependency = %self.dependency,
                    "Circuit breaker re-opening after half-open failure"
                );
                inner.consecutive_successes = 0;
                inner.opened_at = Some(now);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
            }
        }
    }

    fn release_probe(&self, probe: u64) {
        let mut inner = self.lock();
        if inner.probe == Some(probe) {
            tracing::debug!(dependency = %self.dependency, "Probe abandoned before completion");
            inner.probe = None;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.opened_at = None;
                inner.probe = None;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes = 0;
            }
            CircuitState::Open => {
                inner.probe = None;
                if inner.opened_at.is_none() {
                    inner.opened_at = Some(self.clock.now());
                }
            }
        }

        if from == to {
            return;
        }
        metrics::record_breaker_transition(&self.dependency, from, to);
        self.auditor.emit(AuditEventKind::BreakerTransition {
            dependency: self.dependency.clone(),
            from,
            to,
        });
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Admission ticket for one call. Releases an unsettled probe on drop.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.probe);
        } else {
            self.breaker.on_failure(self.probe);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let (false, Some(probe)) = (self.settled, self.probe) {
            self.breaker.release_probe(probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(
        failures: u32,
        successes: u32,
        timeout_ms: u64,
    ) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            timeout_ms,
        };
        let cb = CircuitBreaker::new("billing", config, clock.clone(), Auditor::noop());
        (cb, clock)
    }

    async fn fail(cb: &CircuitBreaker) -> BreakerError<String> {
        cb.execute(|| async { Err::<(), _>("boom".to_string()) })
            .await
            .unwrap_err()
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        cb.execute(|| async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let (cb, _clock) = breaker(3, 2, 1000);

        for i in 1..3 {
            assert!(!fail(&cb).await.is_open());
            assert_eq!(cb.state(), CircuitState::Closed);
            assert_eq!(cb.consecutive_failures(), i);
        }

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.opened_at().is_some());
    }

    #[tokio::test]
    async fn test_success_in_closed_resets_failures() {
        let (cb, _clock) = breaker(3, 2, 1000);
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.consecutive_failures(), 0);

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let (cb, clock) = breaker(1, 1, 1000);
        fail(&cb).await;

        let calls = AtomicU32::new(0);
        clock.advance(Duration::from_millis(999));
        let err = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_timeout_moves_to_half_open_with_single_invocation() {
        let (cb, clock) = breaker(1, 2, 1000);
        fail(&cb).await;
        clock.advance(Duration::from_millis(1000));

        let calls = AtomicU32::new(0);
        cb.execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.consecutive_successes(), 1);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let (cb, clock) = breaker(2, 3, 500);
        fail(&cb).await;
        fail(&cb).await;
        clock.advance(Duration::from_millis(600));

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.consecutive_successes(), 0);
        assert!(cb.opened_at().is_none());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_refreshes_opened_at() {
        let (cb, clock) = breaker(1, 2, 1000);
        fail(&cb).await;
        let first_open = cb.opened_at().unwrap();

        clock.advance(Duration::from_millis(1500));
        succeed(&cb).await.unwrap();
        assert_eq!(cb.consecutive_successes(), 1);

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_successes(), 0);
        let reopened = cb.opened_at().unwrap();
        assert_eq!(reopened, clock.now());
        assert_eq!(reopened - first_open, Duration::from_millis(1500));

        // Timeout counts from the refreshed timestamp.
        clock.advance(Duration::from_millis(999));
        assert!(fail(&cb).await.is_open());
    }

    #[tokio::test]
    async fn test_state_is_pure_read() {
        let (cb, clock) = breaker(1, 1, 100);
        fail(&cb).await;
        clock.advance(Duration::from_secs(10));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_only_one_probe_in_flight() {
        let clock = Arc::new(ManualClock::new());
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout_ms: 100,
        };
        let cb = Arc::new(CircuitBreaker::new("billing", config, clock.clone(), Auditor::noop()));
        fail(&cb).await;
        clock.advance(Duration::from_millis(100));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, String>("probed")
                })
                .await
            })
        };

        while !cb.snapshot().probe_in_flight {
            tokio::task::yield_now().await;
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let calls = AtomicU32::new(0);
        let second = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("second")
            })
            .await;
        assert!(second.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), "probed");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Admit a call while closed and hold it until `outcome` is sent.
    fn held_call(
        cb: &Arc<CircuitBreaker>,
    ) -> (
        tokio::sync::oneshot::Receiver<()>,
        tokio::sync::oneshot::Sender<Result<(), String>>,
        tokio::task::JoinHandle<Result<(), BreakerError<String>>>,
    ) {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();
        let cb = cb.clone();
        let handle = tokio::spawn(async move {
            cb.execute(|| async move {
                let _ = started_tx.send(());
                outcome_rx.await.unwrap_or_else(|_| Err("dropped".to_string()))
            })
            .await
        });
        (started_rx, outcome_tx, handle)
    }

    #[tokio::test]
    async fn test_late_failure_while_open_refreshes_opened_at() {
        let (cb, clock) = breaker(2, 1, 1000);
        let cb = Arc::new(cb);

        let (started, outcome, late) = held_call(&cb);
        started.await.unwrap();

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        let tripped_at = cb.opened_at().unwrap();

        clock.advance(Duration::from_millis(700));
        outcome.send(Err("late".to_string())).unwrap();
        let err = late.await.unwrap().unwrap_err();
        assert_eq!(err.into_action().as_deref(), Some("late"));

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 2);
        assert_eq!(cb.opened_at().unwrap() - tripped_at, Duration::from_millis(700));

        // 1000ms after the trip but only 300ms after the late failure.
        clock.advance(Duration::from_millis(300));
        assert!(fail(&cb).await.is_open());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(700));
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_late_success_while_open_is_ignored() {
        let (cb, clock) = breaker(1, 1, 1000);
        let cb = Arc::new(cb);

        let (started, outcome, late) = held_call(&cb);
        started.await.unwrap();

        fail(&cb).await;
        let tripped_at = cb.opened_at().unwrap();

        clock.advance(Duration::from_millis(400));
        outcome.send(Ok(())).unwrap();
        late.await.unwrap().unwrap();

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.opened_at(), Some(tripped_at));
        assert_eq!(cb.consecutive_failures(), 1);
        assert_eq!(cb.consecutive_successes(), 0);

        clock.advance(Duration::from_millis(599));
        assert!(fail(&cb).await.is_open());
    }

    #[tokio::test]
    async fn test_dropped_probe_releases_slot() {
        let (cb, clock) = breaker(1, 1, 100);
        fail(&cb).await;
        clock.advance(Duration::from_millis(100));

        let abandoned = cb
            .execute(|| std::future::pending::<Result<(), String>>())
            .now_or_never();
        assert!(abandoned.is_none());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.snapshot().probe_in_flight);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_action_error_passes_through() {
        let (cb, _clock) = breaker(5, 1, 100);
        let err = fail(&cb).await;
        assert_eq!(err.into_action().as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_snapshot_and_reset() {
        let (cb, clock) = breaker(1, 1, 1000);
        fail(&cb).await;
        clock.advance(Duration::from_millis(250));

        let snap = cb.snapshot();
        assert_eq!(snap.dependency, "billing");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.open_for_ms, Some(250));

        cb.reset();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.open_for_ms, None);
    }
}
