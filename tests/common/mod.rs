//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use mesh_resilience::audit::{AuditError, AuditEvent, AuditSink};
use tokio::sync::mpsc;

/// Sink that forwards every event into a channel.
#[derive(Debug)]
pub struct ChannelSink(pub mpsc::UnboundedSender<AuditEvent>);

impl AuditSink for ChannelSink {
    fn log_event(&self, event: AuditEvent) -> BoxFuture<'_, Result<(), AuditError>> {
        let _ = self.0.send(event);
        Box::pin(async { Ok(()) })
    }
}

/// Sink that always fails.
#[allow(dead_code)]
#[derive(Debug)]
pub struct FailingSink;

impl AuditSink for FailingSink {
    fn log_event(&self, _event: AuditEvent) -> BoxFuture<'_, Result<(), AuditError>> {
        Box::pin(async { Err(AuditError::Unavailable("collector offline".into())) })
    }
}

/// Counts invocations and fails the first `failures` of them.
#[derive(Debug, Clone, Default)]
pub struct FlakyAction {
    calls: Arc<AtomicU32>,
    failures: u32,
}

#[allow(dead_code)]
impl FlakyAction {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> Result<u32, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(format!("call {} failed", n))
        } else {
            Ok(n)
        }
    }
}
