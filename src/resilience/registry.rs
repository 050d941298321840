use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::CircuitConfig;
use crate::error::{GuardError, Result};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitStatus};
use crate::resilience::classifier::ErrorClassifier;
use crate::resilience::fallback::Fallback;

/// Shared handle to a registered circuit
pub type CircuitHandle<T> = Arc<CircuitBreaker<T>>;

/// Named circuits for one kind of protected value.
///
/// Built once at startup and passed to the consumers that need it; circuits
/// live as long as the registry.
#[derive(Debug)]
pub struct CircuitRegistry<T> {
    circuits: RwLock<HashMap<String, CircuitHandle<T>>>,
    classifier: Arc<ErrorClassifier>,
}

impl<T> Default for CircuitRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CircuitRegistry<T> {
    pub fn new() -> Self {
        Self::with_classifier(Arc::new(ErrorClassifier::default()))
    }

    /// Registry whose circuits all share `classifier`
    pub fn with_classifier(classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            classifier,
        }
    }

    /// Create a circuit under a unique name
    pub async fn register(
        &self,
        name: &str,
        config: CircuitConfig,
        fallback: Option<Arc<dyn Fallback<T>>>,
    ) -> Result<CircuitHandle<T>> {
        config.validate()?;

        let mut circuits = self.circuits.write().await;
        if circuits.contains_key(name) {
            return Err(GuardError::DuplicateCircuit(name.to_string()));
        }

        let mut breaker =
            CircuitBreaker::new(name, config).with_classifier(Arc::clone(&self.classifier));
        if let Some(fallback) = fallback {
            breaker = breaker.with_fallback(fallback);
        }

        let handle = Arc::new(breaker);
        circuits.insert(name.to_string(), Arc::clone(&handle));
        info!(
            circuit = name,
            has_fallback = handle.has_fallback(),
            "Circuit registered"
        );

        Ok(handle)
    }

    pub async fn get(&self, name: &str) -> Result<CircuitHandle<T>> {
        self.circuits
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GuardError::CircuitNotFound(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuits.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn handles(&self) -> Vec<CircuitHandle<T>> {
        self.circuits.read().await.values().cloned().collect()
    }

    /// Status of every circuit, sorted by name
    pub async fn statuses(&self) -> Vec<CircuitStatus> {
        let mut statuses = Vec::new();
        for handle in self.handles().await {
            statuses.push(handle.status().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Reset every circuit to closed with cleared metrics
    pub async fn reset_all(&self) {
        for handle in self.handles().await {
            handle.reset().await;
        }
    }
}
