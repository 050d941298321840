// library entry
pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod probes;
pub mod resilience;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use config::{CircuitConfig, GuardConfig, MonitorConfig};
pub use error::{BoxError, GuardError, Result};
pub use logging::init as init_logging;
pub use monitoring::{Alert, AlertRule, ComprehensiveStatus, Monitor};
pub use resilience::{
    CategorizedError, CircuitBreaker, CircuitHandle, CircuitRegistry, CircuitState,
    CircuitStatus, ErrorCategory, ErrorClassifier, Fallback, HealthProbe, OperationResult,
};
