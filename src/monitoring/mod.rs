// src/monitoring/mod.rs
//! Periodic observation of circuits: status collection, alert rules, health
//! checks and exports.

mod alerts;
mod monitor;

#[cfg(test)]
mod tests;

pub use alerts::{
    Alert, AlertHistory, AlertMetric, AlertRule, AlertSeverity, Comparison, EvaluationContext,
};
pub use monitor::{
    CircuitSample, ComprehensiveStatus, Monitor, MonitorSample, MonitoredCircuit, OverallHealth,
    PerformanceSummary,
};
