//! Audit event emission.
//!
//! # Data Flow
//! ```text
//! Breaker transition / connection attempt / rate-limit block
//!     → AuditEvent (id + timestamp + kind)
//!     → Auditor::emit (spawned, never awaited by the caller)
//!     → AuditSink::log_event
//!     → on error: tracing::warn!, dropped
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: sink latency and failures never reach the call path
//! - The sink itself is an injected collaborator

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::clock::saturating_millis;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventKind {
    ConnectionAttempt {
        dependency: String,
        caller: String,
    },
    BreakerTransition {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
    },
    RateLimitBlocked {
        dependency: String,
        caller: String,
        retry_after_ms: u64,
    },
}

/// An audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        let timestamp_ms =
            saturating_millis(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default());
        Self {
            id: Uuid::new_v4(),
            timestamp_ms,
            kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync + fmt::Debug {
    fn log_event(&self, event: AuditEvent) -> BoxFuture<'_, Result<(), AuditError>>;
}

/// Writes events as JSON through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_event(&self, event: AuditEvent) -> BoxFuture<'_, Result<(), AuditError>> {
        Box::pin(async move {
            let line = serde_json::to_string(&event)?;
            tracing::info!(target: "audit", event = %line, "Audit event");
            Ok(())
        })
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn log_event(&self, _event: AuditEvent) -> BoxFuture<'_, Result<(), AuditError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Fire-and-forget front end to an [`AuditSink`].
#[derive(Debug, Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// An auditor that drops everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopAuditSink))
    }

    /// Hand `kind` to the sink without waiting for it.
    ///
    /// Outside a Tokio runtime the event is dropped with a debug log.
    pub fn emit(&self, kind: AuditEventKind) {
        let event = AuditEvent::new(kind);
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!(event_id = %event.id, "No runtime for audit event, dropping");
                return;
            }
        };

        let sink = self.sink.clone();
        handle.spawn(async move {
            let id = event.id;
            if let Err(e) = sink.log_event(event).await {
                tracing::warn!(event_id = %id, error = %e, "Audit sink failed, event dropped");
            }
        });
    }
}

impl Default for Auditor {
    fn default() -> Self {
        Self::noop()
    }
}
