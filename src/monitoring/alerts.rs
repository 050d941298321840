// src/monitoring/alerts.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::config::duration_serde;
use crate::resilience::{CircuitState, CircuitStatus, HealthSnapshot};

/// How loud an alert is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A value a rule can watch, looked up per circuit on every tick
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    FailureRate,
    AvgResponseTimeMs,
    P95ResponseTimeMs,
    RetryRate,
    FallbackRate,
    RejectionRate,
    /// 1.0 while the circuit is open, 0.0 otherwise
    CircuitOpen,
    ConsecutiveHealthFailures,
    /// Externally supplied value, see `Monitor::set_gauge`
    Gauge(String),
}

impl AlertMetric {
    /// Key under which the metric appears in an evaluation context
    pub fn key(&self) -> String {
        match self {
            AlertMetric::FailureRate => "failure_rate".to_string(),
            AlertMetric::AvgResponseTimeMs => "avg_response_time_ms".to_string(),
            AlertMetric::P95ResponseTimeMs => "p95_response_time_ms".to_string(),
            AlertMetric::RetryRate => "retry_rate".to_string(),
            AlertMetric::FallbackRate => "fallback_rate".to_string(),
            AlertMetric::RejectionRate => "rejection_rate".to_string(),
            AlertMetric::CircuitOpen => "circuit_open".to_string(),
            AlertMetric::ConsecutiveHealthFailures => "consecutive_health_failures".to_string(),
            AlertMetric::Gauge(name) => format!("gauge.{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    AtLeast,
    Below,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => value > threshold,
            Comparison::AtLeast => value >= threshold,
            Comparison::Below => value < threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Above => ">",
            Comparison::AtLeast => ">=",
            Comparison::Below => "<",
        }
    }
}

fn default_comparison() -> Comparison {
    Comparison::Above
}

fn default_enabled() -> bool {
    true
}

fn default_repeat_interval() -> Duration {
    Duration::from_secs(300)
}

/// A threshold condition evaluated against every monitored circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: AlertMetric,

    #[serde(default = "default_comparison")]
    pub comparison: Comparison,

    pub threshold: f64,

    /// The condition has to hold this long before the rule fires
    #[serde(default, with = "duration_serde")]
    pub min_duration: Duration,

    pub severity: AlertSeverity,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Only evaluate the circuit with this name
    #[serde(default)]
    pub circuit: Option<String>,

    /// After firing, the rule stays quiet for this long
    #[serde(default = "default_repeat_interval", with = "duration_serde")]
    pub repeat_interval: Duration,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        metric: AlertMetric,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            name: name.into(),
            metric,
            comparison: default_comparison(),
            threshold,
            min_duration: Duration::ZERO,
            severity,
            enabled: true,
            circuit: None,
            repeat_interval: default_repeat_interval(),
        }
    }

    pub fn comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    pub fn for_circuit(mut self, circuit: impl Into<String>) -> Self {
        self.circuit = Some(circuit.into());
        self
    }

    pub fn repeat_every(mut self, repeat_interval: Duration) -> Self {
        self.repeat_interval = repeat_interval;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn applies_to(&self, circuit: &str) -> bool {
        self.circuit.as_deref().map_or(true, |only| only == circuit)
    }

    /// The observed value when the condition holds for this context.
    ///
    /// A metric missing from the context never holds.
    pub fn evaluate(&self, context: &EvaluationContext) -> Option<f64> {
        let value = context.get(&self.metric)?;
        self.comparison.holds(value, self.threshold).then_some(value)
    }

    /// Standard rules covering the usual ways a dependency goes bad
    pub fn default_rules() -> Vec<AlertRule> {
        vec![
            AlertRule::new(
                "high_failure_rate",
                AlertMetric::FailureRate,
                0.5,
                AlertSeverity::Critical,
            ),
            AlertRule::new(
                "circuit_open",
                AlertMetric::CircuitOpen,
                1.0,
                AlertSeverity::Warning,
            )
            .comparison(Comparison::AtLeast),
            AlertRule::new(
                "slow_responses",
                AlertMetric::P95ResponseTimeMs,
                1_000.0,
                AlertSeverity::Warning,
            )
            .min_duration(Duration::from_secs(60)),
            AlertRule::new(
                "heavy_fallback_use",
                AlertMetric::FallbackRate,
                0.3,
                AlertSeverity::Warning,
            ),
            AlertRule::new(
                "health_check_failing",
                AlertMetric::ConsecutiveHealthFailures,
                3.0,
                AlertSeverity::Critical,
            )
            .comparison(Comparison::AtLeast),
        ]
    }
}

/// Per-circuit values a rule is evaluated against
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub circuit: String,
    values: HashMap<String, f64>,
}

impl EvaluationContext {
    pub fn new(circuit: impl Into<String>) -> Self {
        Self {
            circuit: circuit.into(),
            values: HashMap::new(),
        }
    }

    /// Derive the context from a circuit's status, its dependency health and
    /// any gauges supplied for it
    pub fn from_status(
        status: &CircuitStatus,
        health: Option<&HealthSnapshot>,
        gauges: Option<&HashMap<String, f64>>,
    ) -> Self {
        let metrics = &status.metrics;
        let mut context = Self::new(status.name.clone());

        context.insert(&AlertMetric::FailureRate, metrics.failure_rate());
        context.insert(&AlertMetric::AvgResponseTimeMs, metrics.avg_response_time_ms);
        context.insert(&AlertMetric::P95ResponseTimeMs, metrics.p95_response_time_ms);
        context.insert(&AlertMetric::RetryRate, metrics.retry_rate());
        context.insert(&AlertMetric::FallbackRate, metrics.fallback_rate());
        context.insert(&AlertMetric::RejectionRate, metrics.rejection_rate());
        context.insert(
            &AlertMetric::CircuitOpen,
            if status.state == CircuitState::Open { 1.0 } else { 0.0 },
        );
        if let Some(health) = health {
            context.insert(
                &AlertMetric::ConsecutiveHealthFailures,
                health.consecutive_failures as f64,
            );
        }
        for (key, value) in gauges.into_iter().flatten() {
            context.insert(&AlertMetric::Gauge(key.clone()), *value);
        }

        context
    }

    pub fn insert(&mut self, metric: &AlertMetric, value: f64) {
        self.values.insert(metric.key(), value);
    }

    pub fn get(&self, metric: &AlertMetric) -> Option<f64> {
        self.values.get(&metric.key()).copied()
    }
}

/// A fired rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_name: String,
    /// Circuits for which the rule held
    pub circuits: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub message: String,
    /// Observed value per triggering circuit
    pub observed: BTreeMap<String, f64>,
}

impl Alert {
    pub fn new(rule: &AlertRule, observed: BTreeMap<String, f64>) -> Self {
        let circuits: Vec<String> = observed.keys().cloned().collect();
        let message = format!(
            "{} {} {} on {}",
            rule.metric.key(),
            rule.comparison.symbol(),
            rule.threshold,
            circuits.join(", ")
        );

        Self {
            id: Uuid::new_v4(),
            rule_name: rule.name.clone(),
            circuits,
            timestamp: Utc::now(),
            severity: rule.severity,
            message,
            observed,
        }
    }
}

/// Append-only alert log; the oldest alert is evicted at capacity
#[derive(Debug)]
pub struct AlertHistory {
    alerts: VecDeque<Alert>,
    capacity: usize,
    total: u64,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity.min(1_024)),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, alert: Alert) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.alerts.len() == self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Up to `limit` alerts, newest first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    /// Everything retained, oldest first
    pub fn all(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Alerts ever recorded, evicted ones included
    pub fn total(&self) -> u64 {
        self.total
    }
}
