//! Per-node dependency registry.
//!
//! # Responsibilities
//! - Build one invoker (limiter + breaker + retry) per configured dependency
//! - Route calls to the right invoker by dependency name
//! - Report breaker state across dependencies

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::audit::{Auditor, TracingAuditSink};
use crate::config::MeshConfig;
use crate::node::invoker::{InvokeError, ResilientInvoker};
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::clock::{Clock, MonotonicClock, Sleeper, TokioSleeper};

/// All resilience state owned by one mesh node.
#[derive(Debug)]
pub struct MeshNode {
    /// Map of dependency name -> invoker.
    invokers: HashMap<String, Arc<ResilientInvoker>>,
}

impl MeshNode {
    /// Create the registry from configuration with injected collaborators.
    pub fn from_config(
        config: &MeshConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        auditor: Auditor,
    ) -> Self {
        let mut invokers = HashMap::new();
        for dep in &config.dependencies {
            let invoker = ResilientInvoker::new(
                dep.name.clone(),
                &dep.resilience,
                clock.clone(),
                sleeper.clone(),
                auditor.clone(),
            );
            if invokers.insert(dep.name.clone(), Arc::new(invoker)).is_some() {
                tracing::warn!(
                    dependency = %dep.name,
                    "Duplicate dependency, keeping the last definition"
                );
            }
        }

        tracing::info!(dependencies = invokers.len(), "Mesh node resilience initialized");
        Self { invokers }
    }

    /// Tokio time, Tokio sleeps and audit events written through `tracing`.
    pub fn with_defaults(config: &MeshConfig) -> Self {
        Self::from_config(
            config,
            Arc::new(MonotonicClock),
            Arc::new(TokioSleeper),
            Auditor::new(Arc::new(TracingAuditSink)),
        )
    }

    pub fn invoker(&self, dependency: &str) -> Option<Arc<ResilientInvoker>> {
        self.invokers.get(dependency).cloned()
    }

    /// Names of all guarded dependencies, sorted.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.invokers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Call `dependency` on behalf of `caller`.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        dependency: &str,
        caller: &str,
        action: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match self.invokers.get(dependency) {
            Some(invoker) => invoker.invoke(caller, action).await,
            None => {
                tracing::debug!(dependency = %dependency, "Call to unknown dependency");
                Err(InvokeError::UnknownDependency(dependency.to_string()))
            }
        }
    }

    /// Breaker snapshots for every dependency, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.invokers.values().map(|i| i.breaker().snapshot()).collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyConfig, ResilienceConfig};
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::clock::ManualClock;

    fn config(names: &[&str]) -> MeshConfig {
        let mut resilience = ResilienceConfig::default();
        resilience.circuit_breaker.failure_threshold = 1;
        resilience.retry.max_attempts = 1;
        MeshConfig {
            dependencies: names
                .iter()
                .map(|n| DependencyConfig {
                    name: n.to_string(),
                    resilience: resilience.clone(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn node(names: &[&str]) -> MeshNode {
        MeshNode::from_config(
            &config(names),
            Arc::new(ManualClock::new()),
            Arc::new(TokioSleeper),
            Auditor::noop(),
        )
    }

    #[tokio::test]
    async fn test_unknown_dependency() {
        let node = node(&["billing"]);
        let err = node
            .invoke("search", "svc-a", || async { Ok::<_, String>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::UnknownDependency(ref d) if d == "search"));
    }

    #[tokio::test]
    async fn test_dependencies_are_isolated() {
        let node = node(&["inventory", "billing"]);
        assert_eq!(node.dependencies(), vec!["billing", "inventory"]);

        let _ = node
            .invoke("billing", "svc-a", || async { Err::<(), _>("down") })
            .await;

        let value = node
            .invoke("inventory", "svc-a", || async { Ok::<_, String>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let states: Vec<(String, CircuitState)> = node
            .snapshots()
            .into_iter()
            .map(|s| (s.dependency, s.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("billing".to_string(), CircuitState::Open),
                ("inventory".to_string(), CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_invoker_lookup_shares_state() {
        let node = node(&["billing"]);
        let a = node.invoker("billing").unwrap();
        let b = node.invoker("billing").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(node.invoker("ledger").is_none());
    }
}
