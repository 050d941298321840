// src/resilience/mod.rs
//! Call protection for unreliable dependencies.
//!
//! 1. **Error Classification** - Decide whether a failure is worth retrying and
//!    whether it says anything about the dependency's health
//! 2. **Retry with Exponential Backoff** - Smart retries for transient failures
//! 3. **Circuit Breaking** - Fail fast while a dependency is down, probe for recovery
//! 4. **Fallback Mechanisms** - Graceful degradation when the primary path is unavailable
//! 5. **Health Checks** - Actively probe dependencies to detect problems early

pub mod circuit_breaker;
pub mod classifier;
mod exponential_backoff;
pub mod fallback;
mod health_checker;
pub mod metrics;
mod registry;
mod retry;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus, OperationResult};
pub use classifier::{CategorizedError, Classification, ErrorCategory, ErrorClassifier};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use fallback::{run_fallback, Fallback, StaticFallback};
pub use health_checker::{HealthCheckConfig, HealthChecker, HealthProbe, HealthSnapshot};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use registry::{CircuitHandle, CircuitRegistry};
pub use retry::{AttemptFailure, RetryExecutor, RetryOutcome};
