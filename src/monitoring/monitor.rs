// src/monitoring/monitor.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{GuardError, Result};
use crate::monitoring::alerts::{Alert, AlertHistory, AlertRule, AlertSeverity, EvaluationContext};
use crate::resilience::{
    CircuitBreaker, CircuitState, CircuitStatus, HealthCheckConfig, HealthChecker, HealthProbe,
    HealthSnapshot,
};

const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Anything the monitor can poll for a status
#[async_trait]
pub trait MonitoredCircuit: Send + Sync {
    fn name(&self) -> &str;
    async fn status(&self) -> Result<CircuitStatus>;
}

#[async_trait]
impl<T> MonitoredCircuit for CircuitBreaker<T>
where
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        CircuitBreaker::name(self)
    }

    async fn status(&self) -> Result<CircuitStatus> {
        Ok(CircuitBreaker::status(self).await)
    }
}

/// Condensed per-circuit values kept in the time series
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSample {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub total_requests: u64,
    pub failure_rate: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: f64,
}

/// One monitoring tick
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSample {
    pub timestamp: DateTime<Utc>,
    pub circuits: Vec<CircuitSample>,
    pub alerts_fired: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    pub circuits: usize,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
    pub total_requests: u64,
    pub total_failures: u64,
    pub rejected_requests: u64,
    pub fallback_executions: u64,
    pub overall_failure_rate: f64,
    /// Average over all circuits, weighted by their sample counts
    pub avg_response_time_ms: f64,
    pub unhealthy_dependencies: usize,
    pub total_alerts: u64,
}

/// Everything the monitor knows, in one serializable document
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveStatus {
    pub generated_at: DateTime<Utc>,
    pub overall_health: OverallHealth,
    pub monitoring_active: bool,
    pub circuits: Vec<CircuitStatus>,
    pub health_checks: Vec<HealthSnapshot>,
    pub recent_alerts: Vec<Alert>,
    pub performance: PerformanceSummary,
}

/// Breach bookkeeping for `min_duration` and `repeat_interval`
#[derive(Debug, Default)]
struct RuleTracker {
    breach_since: HashMap<(String, String), Instant>,
    last_fired: HashMap<String, Instant>,
}

struct MonitorTasks {
    shutdown: watch::Sender<bool>,
    collector: JoinHandle<()>,
    health: Vec<JoinHandle<()>>,
}

/// Polls registered circuits, evaluates alert rules and runs health checks.
///
/// The monitor only reads circuit snapshots. Construct it once, register
/// circuits and probes, then drive it with `start_monitoring` /
/// `stop_monitoring` or tick it manually with `evaluate_now`.
pub struct Monitor {
    config: MonitorConfig,
    circuits: RwLock<Vec<Arc<dyn MonitoredCircuit>>>,
    health_checkers: RwLock<Vec<Arc<HealthChecker>>>,
    rules: RwLock<Vec<AlertRule>>,
    gauges: RwLock<HashMap<String, HashMap<String, f64>>>,
    alerts: Mutex<AlertHistory>,
    history: Mutex<VecDeque<MonitorSample>>,
    tracker: Mutex<RuleTracker>,
    alert_tx: broadcast::Sender<Alert>,
    tasks: Mutex<Option<MonitorTasks>>,
    ticks: AtomicU64,
    collection_errors: AtomicU64,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("ticks", &self.ticks.load(Ordering::Relaxed))
            .field("active", &self.is_active())
            .finish()
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            alerts: Mutex::new(AlertHistory::new(config.alert_history_size)),
            history: Mutex::new(VecDeque::new()),
            circuits: RwLock::new(Vec::new()),
            health_checkers: RwLock::new(Vec::new()),
            rules: RwLock::new(Vec::new()),
            gauges: RwLock::new(HashMap::new()),
            tracker: Mutex::new(RuleTracker::default()),
            alert_tx,
            tasks: Mutex::new(None),
            ticks: AtomicU64::new(0),
            collection_errors: AtomicU64::new(0),
            config,
        }
    }

    /// Monitor preloaded with `AlertRule::default_rules`
    pub fn with_default_rules(config: MonitorConfig) -> Self {
        let monitor = Self::new(config);
        for rule in AlertRule::default_rules() {
            monitor.add_rule(rule);
        }
        monitor
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start polling `circuit`; names must be unique
    pub fn register_for_monitoring<C>(&self, circuit: Arc<C>) -> Result<()>
    where
        C: MonitoredCircuit + 'static,
    {
        let mut circuits = self.circuits.write().unwrap_or_else(PoisonError::into_inner);
        if circuits.iter().any(|known| known.name() == circuit.name()) {
            return Err(GuardError::DuplicateCircuit(circuit.name().to_string()));
        }

        info!(circuit = circuit.name(), "Circuit registered for monitoring");
        circuits.push(circuit);
        Ok(())
    }

    /// Actively probe a dependency. Use the circuit's name so the results feed
    /// that circuit's `consecutive_health_failures`.
    pub fn register_health_check(
        &self,
        name: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
    ) -> Arc<HealthChecker> {
        let checker = Arc::new(HealthChecker::new(
            name,
            probe,
            HealthCheckConfig::from(&self.config),
        ));

        // Held across the push so a concurrent start cannot launch it twice
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        self.health_checkers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&checker));

        // Already running: start the new checker alongside the others
        if let Some(tasks) = tasks.as_mut() {
            tasks.health.push(Arc::clone(&checker).start());
        }

        info!(dependency = checker.name(), "Health check registered");
        checker
    }

    pub fn add_rule(&self, rule: AlertRule) {
        debug!(rule = %rule.name, metric = %rule.metric.key(), threshold = rule.threshold, "Alert rule added");
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Supply an external value (pool size, queue depth, ...) for a circuit
    pub fn set_gauge(&self, circuit: &str, key: &str, value: f64) {
        self.gauges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(circuit.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Receive every alert fired from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn the collection loop and one loop per health check
    pub fn start_monitoring(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_some() {
            return Err(GuardError::Internal("monitoring already started".to_string()));
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let collector = tokio::spawn(async move {
            let mut ticker = time::interval(monitor.config.monitoring_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.evaluate_now().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Monitoring loop stopped");
        });

        let health = self
            .health_checkers()
            .into_iter()
            .map(|checker| checker.start())
            .collect();

        *tasks = Some(MonitorTasks {
            shutdown,
            collector,
            health,
        });

        info!(
            interval_ms = self.config.monitoring_interval.as_millis() as u64,
            "Monitoring started"
        );
        Ok(())
    }

    /// Stop both loops; an iteration already in progress completes first
    pub async fn stop_monitoring(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return;
        };

        let _ = tasks.shutdown.send(true);
        for checker in self.health_checkers() {
            checker.stop();
        }

        if let Err(e) = tasks.collector.await {
            error!(error = %e, "Monitoring loop ended abnormally");
        }
        for handle in tasks.health {
            if let Err(e) = handle.await {
                error!(error = %e, "Health check loop ended abnormally");
            }
        }

        info!("Monitoring stopped");
    }

    /// Run one monitoring tick: collect, evaluate, record. Returns the alerts
    /// that fired.
    pub async fn evaluate_now(&self) -> Vec<Alert> {
        let statuses = self.collect_statuses().await;
        let health: HashMap<String, HealthSnapshot> = self
            .health_checkers()
            .iter()
            .map(|checker| (checker.name().to_string(), checker.snapshot()))
            .collect();

        let contexts: Vec<EvaluationContext> = {
            let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
            statuses
                .iter()
                .map(|status| {
                    EvaluationContext::from_status(
                        status,
                        health.get(&status.name),
                        gauges.get(&status.name),
                    )
                })
                .collect()
        };

        let fired = self.evaluate_rules(&contexts);
        for alert in &fired {
            match alert.severity {
                AlertSeverity::Info => info!(
                    rule = %alert.rule_name,
                    circuits = ?alert.circuits,
                    "Alert: {}", alert.message
                ),
                _ => warn!(
                    rule = %alert.rule_name,
                    severity = %alert.severity,
                    circuits = ?alert.circuits,
                    "Alert: {}", alert.message
                ),
            }
            // No subscribers is fine
            let _ = self.alert_tx.send(alert.clone());
        }

        {
            let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
            for alert in &fired {
                alerts.push(alert.clone());
            }
        }
        self.push_sample(&statuses, fired.len());
        self.ticks.fetch_add(1, Ordering::Relaxed);

        fired
    }

    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .all()
    }

    /// Up to `recent_alerts_limit` alerts, newest first
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(self.config.recent_alerts_limit)
    }

    /// The bounded time series of past ticks, oldest first
    pub fn metrics_history(&self) -> Vec<MonitorSample> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn health_snapshots(&self) -> Vec<HealthSnapshot> {
        self.health_checkers()
            .iter()
            .map(|checker| checker.snapshot())
            .collect()
    }

    pub async fn comprehensive_status(&self) -> ComprehensiveStatus {
        let circuits = self.collect_statuses().await;
        let health_checks = self.health_snapshots();
        let total_alerts = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total();

        let mut performance = PerformanceSummary {
            circuits: circuits.len(),
            unhealthy_dependencies: health_checks.iter().filter(|h| !h.healthy).count(),
            total_alerts,
            ..Default::default()
        };
        let mut weighted_latency = 0.0;
        let mut samples = 0usize;
        for status in &circuits {
            match status.state {
                CircuitState::Open => performance.open_circuits += 1,
                CircuitState::HalfOpen => performance.half_open_circuits += 1,
                CircuitState::Closed => {}
            }
            let metrics = &status.metrics;
            performance.total_requests += metrics.total_requests;
            performance.total_failures += metrics.total_failures;
            performance.rejected_requests += metrics.rejected_requests;
            performance.fallback_executions += metrics.fallback_executions;
            weighted_latency += metrics.avg_response_time_ms * metrics.sample_count as f64;
            samples += metrics.sample_count;
        }
        if performance.total_requests > 0 {
            performance.overall_failure_rate =
                performance.total_failures as f64 / performance.total_requests as f64;
        }
        if samples > 0 {
            performance.avg_response_time_ms = weighted_latency / samples as f64;
        }

        let overall_health = if !circuits.is_empty() && performance.open_circuits == circuits.len() {
            OverallHealth::Unhealthy
        } else if performance.open_circuits > 0
            || performance.half_open_circuits > 0
            || performance.unhealthy_dependencies > 0
        {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };

        ComprehensiveStatus {
            generated_at: Utc::now(),
            overall_health,
            monitoring_active: self.is_active(),
            circuits,
            health_checks,
            recent_alerts: self.recent_alerts(),
            performance,
        }
    }

    /// Flat `name -> value` export suitable for a metrics scraper
    pub async fn export_metrics(&self) -> BTreeMap<String, f64> {
        let mut exported = BTreeMap::new();

        for status in self.collect_statuses().await {
            let prefix = format!("circuit.{}", status.name);
            let metrics = &status.metrics;
            let values = [
                ("state", status.state.as_gauge()),
                ("failure_count", status.failure_count as f64),
                ("total_requests", metrics.total_requests as f64),
                ("total_successes", metrics.total_successes as f64),
                ("total_failures", metrics.total_failures as f64),
                ("total_retries", metrics.total_retries as f64),
                ("rejected_requests", metrics.rejected_requests as f64),
                ("circuit_opens", metrics.circuit_opens as f64),
                ("circuit_closes", metrics.circuit_closes as f64),
                ("fallback_executions", metrics.fallback_executions as f64),
                ("slow_operation_count", metrics.slow_operation_count as f64),
                ("failure_rate", metrics.failure_rate()),
                ("retry_rate", metrics.retry_rate()),
                ("fallback_rate", metrics.fallback_rate()),
                ("avg_response_time_ms", metrics.avg_response_time_ms),
                ("p95_response_time_ms", metrics.p95_response_time_ms),
                ("p99_response_time_ms", metrics.p99_response_time_ms),
            ];
            for (key, value) in values {
                exported.insert(format!("{}.{}", prefix, key), value);
            }
            for (category, count) in &metrics.failures_by_category {
                exported.insert(format!("{}.failures.{}", prefix, category), *count as f64);
            }
        }

        for health in self.health_snapshots() {
            let prefix = format!("health.{}", health.name);
            exported.insert(
                format!("{}.healthy", prefix),
                if health.healthy { 1.0 } else { 0.0 },
            );
            exported.insert(
                format!("{}.consecutive_failures", prefix),
                health.consecutive_failures as f64,
            );
        }

        {
            let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
            for (circuit, values) in gauges.iter() {
                for (key, value) in values {
                    exported.insert(format!("gauge.{}.{}", circuit, key), *value);
                }
            }
        }

        let total_alerts = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total();
        exported.insert("monitor.alerts_total".to_string(), total_alerts as f64);
        exported.insert(
            "monitor.ticks".to_string(),
            self.ticks.load(Ordering::Relaxed) as f64,
        );
        exported.insert(
            "monitor.collection_errors".to_string(),
            self.collection_errors.load(Ordering::Relaxed) as f64,
        );

        exported
    }

    fn circuits(&self) -> Vec<Arc<dyn MonitoredCircuit>> {
        self.circuits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn health_checkers(&self) -> Vec<Arc<HealthChecker>> {
        self.health_checkers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // A circuit that fails to report is skipped for this tick
    async fn collect_statuses(&self) -> Vec<CircuitStatus> {
        let mut statuses = Vec::new();
        for circuit in self.circuits() {
            match circuit.status().await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    self.collection_errors.fetch_add(1, Ordering::Relaxed);
                    error!(circuit = circuit.name(), error = %e, "Failed to collect circuit status");
                }
            }
        }
        statuses
    }

    fn evaluate_rules(&self, contexts: &[EvaluationContext]) -> Vec<Alert> {
        let rules = self.rules();
        let now = Instant::now();
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        let mut fired = Vec::new();

        // A circuit missing from this tick has no continuous breach to extend
        tracker
            .breach_since
            .retain(|(_, circuit), _| contexts.iter().any(|c| &c.circuit == circuit));

        for rule in rules.iter().filter(|rule| rule.enabled) {
            let mut observed = BTreeMap::new();

            for context in contexts.iter().filter(|c| rule.applies_to(&c.circuit)) {
                let key = (rule.name.clone(), context.circuit.clone());
                match rule.evaluate(context) {
                    Some(value) => {
                        let since = *tracker.breach_since.entry(key).or_insert(now);
                        if now.saturating_duration_since(since) >= rule.min_duration {
                            observed.insert(context.circuit.clone(), value);
                        }
                    }
                    None => {
                        tracker.breach_since.remove(&key);
                    }
                }
            }

            if observed.is_empty() {
                continue;
            }
            if let Some(last) = tracker.last_fired.get(&rule.name) {
                if now.saturating_duration_since(*last) < rule.repeat_interval {
                    debug!(rule = %rule.name, "Alert suppressed within repeat interval");
                    continue;
                }
            }

            tracker.last_fired.insert(rule.name.clone(), now);
            fired.push(Alert::new(rule, observed));
        }

        fired
    }

    fn push_sample(&self, statuses: &[CircuitStatus], alerts_fired: usize) {
        let sample = MonitorSample {
            timestamp: Utc::now(),
            circuits: statuses
                .iter()
                .map(|status| CircuitSample {
                    name: status.name.clone(),
                    state: status.state,
                    failure_count: status.failure_count,
                    total_requests: status.metrics.total_requests,
                    failure_rate: status.metrics.failure_rate(),
                    avg_response_time_ms: status.metrics.avg_response_time_ms,
                    p95_response_time_ms: status.metrics.p95_response_time_ms,
                })
                .collect(),
            alerts_fired,
        };

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if self.config.metrics_history_size == 0 {
            return;
        }
        while history.len() >= self.config.metrics_history_size {
            history.pop_front();
        }
        history.push_back(sample);
    }
}
