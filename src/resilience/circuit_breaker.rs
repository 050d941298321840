use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::circuit_event;
use crate::config::CircuitConfig;
use crate::error::{BoxError, GuardError, Result};
use crate::operation_outcome;
use crate::resilience::classifier::{ErrorCategory, ErrorClassifier};
use crate::resilience::exponential_backoff::RetryConfig;
use crate::resilience::fallback::{run_fallback, Fallback};
use crate::resilience::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::resilience::retry::RetryExecutor;

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are failing fast and not being sent
    Open,
    /// Circuit is letting probes through to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used in flat metric exports
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// A countable failure inside the sliding window
#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    at: Instant,
    category: ErrorCategory,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Countable failures, oldest first
    failures: VecDeque<FailureRecord>,
    /// Successes since entering half-open
    success_count: usize,
    /// When an open circuit lets the next probe through; None keeps it open
    next_attempt_at: Option<Instant>,
    probes_in_flight: usize,
    /// Bumped on every transition; outcomes from an older generation are stale
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            success_count: 0,
            next_attempt_at: None,
            probes_in_flight: 0,
            generation: 0,
        }
    }

    // `None` is a low-level hook call, which always applies to the current state
    fn is_current(&self, ticket: Option<Ticket>) -> bool {
        ticket.map_or(true, |ticket| ticket.generation == self.generation)
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest.at) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Issued to an admitted call and handed back with its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    generation: u64,
    probe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Admitted(Ticket),
    Rejected,
}

/// Outcome of one protected call
#[derive(Debug)]
pub struct OperationResult<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<GuardError>,
    /// Category of the primary failure, when there was one
    pub error_category: Option<ErrorCategory>,
    /// The fallback produced this result (value or error)
    pub from_fallback: bool,
    pub execution_time: Duration,
    pub retry_count: usize,
    /// Circuit state when the call returned
    pub circuit_state: CircuitState,
}

impl<T> OperationResult<T> {
    /// Turn a failed result into an error
    pub fn into_result(self) -> Result<T> {
        match self.value {
            Some(value) => Ok(value),
            None => Err(self.error.unwrap_or_else(|| {
                GuardError::Internal("operation produced neither a value nor an error".to_string())
            })),
        }
    }
}

/// Exported view of one circuit
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    /// Countable failures currently inside the window
    pub failure_count: usize,
    pub recent_failure_categories: Vec<ErrorCategory>,
    /// Successes since entering half-open
    pub success_count: usize,
    /// Time until an open circuit admits a probe
    pub next_attempt_in_ms: Option<u64>,
    pub config: CircuitConfig,
    pub metrics: MetricsSnapshot,
}

/// Per-dependency circuit breaker.
///
/// All state transitions happen under a single per-circuit mutex, so
/// concurrent callers can never trip or close the circuit twice from stale
/// reads. While half-open the breaker admits concurrent probes unless
/// `strict_half_open` is set, in which case exactly one probe is in flight
/// and other callers are rejected.
pub struct CircuitBreaker<T> {
    name: String,
    config: CircuitConfig,
    state: Mutex<BreakerState>,
    metrics: MetricsAggregator,
    retry: RetryExecutor,
    fallback: Option<Arc<dyn Fallback<T>>>,
}

impl<T> fmt::Debug for CircuitBreaker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<T> CircuitBreaker<T> {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let classifier = Arc::new(ErrorClassifier::default());
        Self {
            name: name.into(),
            metrics: MetricsAggregator::new(config.response_time_samples, config.slow_call_threshold),
            retry: RetryExecutor::new(RetryConfig::from(&config), classifier),
            state: Mutex::new(BreakerState::new()),
            fallback: None,
            config,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Fallback<T>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.retry = RetryExecutor::new(RetryConfig::from(&self.config), classifier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Run `operation` under the breaker's protection.
    ///
    /// Never fails past this boundary: rejections, classified failures and
    /// fallback outcomes are all reported in the returned `OperationResult`.
    pub async fn execute<F, Fut, E>(&self, operation: F) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let started = Instant::now();

        let ticket = match self.admit().await {
            Admission::Admitted(ticket) => ticket,
            Admission::Rejected => {
                self.metrics.record_rejection();
                debug!(circuit = %self.name, "Call rejected by open circuit");
                let result = self.reject(started).await;
                operation_outcome!(self.name.as_str(), result);
                return result;
            }
        };

        let outcome = self.retry.run(operation).await;
        let retry_count = outcome.retry_count();
        self.metrics.record_retries(retry_count);

        let result = match outcome.result {
            Ok(value) => {
                self.metrics.record_request(true, outcome.elapsed, None);
                self.on_success(Some(ticket)).await;

                OperationResult {
                    success: true,
                    value: Some(value),
                    error: None,
                    error_category: None,
                    from_fallback: false,
                    execution_time: started.elapsed(),
                    retry_count,
                    circuit_state: self.state().await,
                }
            }
            Err(failure) => {
                let category = failure.classification.category;
                self.metrics
                    .record_request(false, outcome.elapsed, Some(category));

                if failure.classification.counts_as_failure {
                    self.on_failure(category, Some(ticket)).await;
                } else {
                    self.release_probe(Some(ticket)).await;
                }

                match &self.fallback {
                    Some(fallback) if category.is_retryable() => {
                        self.degrade(
                            fallback.as_ref(),
                            Some((category, &failure.error)),
                            started,
                            retry_count,
                        )
                        .await
                    }
                    _ => OperationResult {
                        success: false,
                        value: None,
                        error: Some(failure.error),
                        error_category: Some(category),
                        from_fallback: false,
                        execution_time: started.elapsed(),
                        retry_count,
                        circuit_state: self.state().await,
                    },
                }
            }
        };

        operation_outcome!(self.name.as_str(), result);
        result
    }

    /// `execute` for callers that prefer `?` over inspecting the result
    pub async fn call<F, Fut, E>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.execute(operation).await.into_result()
    }

    /// Check whether a call would be admitted right now.
    ///
    /// Like `execute`, this moves an open circuit whose timeout has elapsed to
    /// half-open. Pair it with `record_success` / `record_failure`.
    pub async fn allow_request(&self) -> bool {
        matches!(self.admit().await, Admission::Admitted(_))
    }

    /// Record a successful operation run outside `execute`
    pub async fn record_success(&self) {
        self.on_success(None).await;
    }

    /// Record a failed operation run outside `execute`
    pub async fn record_failure(&self, category: ErrorCategory) {
        if category.counts_as_failure() {
            self.on_failure(category, None).await;
        } else {
            self.release_probe(None).await;
        }
    }

    /// Get the current state of the circuit breaker
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Countable failures currently inside the window
    pub async fn failure_count(&self) -> usize {
        let mut inner = self.state.lock().await;
        inner.prune(Instant::now(), self.config.time_window);
        inner.failures.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn status(&self) -> CircuitStatus {
        let (state, failure_count, recent_failure_categories, success_count, next_attempt_in_ms) = {
            let mut inner = self.state.lock().await;
            let now = Instant::now();
            inner.prune(now, self.config.time_window);
            let next_attempt_in_ms = match (inner.state, inner.next_attempt_at) {
                (CircuitState::Open, Some(at)) => {
                    Some(at.saturating_duration_since(now).as_millis() as u64)
                }
                _ => None,
            };
            (
                inner.state,
                inner.failures.len(),
                inner.failures.iter().map(|record| record.category).collect(),
                inner.success_count,
                next_attempt_in_ms,
            )
        };

        CircuitStatus {
            name: self.name.clone(),
            state,
            failure_count,
            recent_failure_categories,
            success_count,
            next_attempt_in_ms,
            config: self.config.clone(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Return to closed and clear failures and metrics
    pub async fn reset(&self) {
        let mut inner = self.state.lock().await;
        let previous = inner.state;
        let generation = inner.generation + 1;
        *inner = BreakerState::new();
        inner.generation = generation;
        self.metrics.reset();
        info!(circuit = %self.name, previous = %previous, "Circuit breaker reset");
    }

    /// Open the circuit and keep it open until `reset` or `force_close`
    pub async fn force_open(&self) {
        let mut inner = self.state.lock().await;
        self.transition(&mut inner, CircuitState::Open, "forced open");
        inner.next_attempt_at = None;
    }

    pub async fn force_close(&self) {
        let mut inner = self.state.lock().await;
        self.transition(&mut inner, CircuitState::Closed, "forced closed");
    }

    async fn admit(&self) -> Admission {
        let mut inner = self.state.lock().await;

        match inner.state {
            CircuitState::Closed => Admission::Admitted(Ticket {
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => match inner.next_attempt_at {
                Some(at) if Instant::now() >= at => {
                    self.transition(&mut inner, CircuitState::HalfOpen, "open timeout elapsed");
                    inner.probes_in_flight = 1;
                    self.metrics.record_half_open_attempt();
                    Admission::Admitted(Ticket {
                        generation: inner.generation,
                        probe: true,
                    })
                }
                _ => Admission::Rejected,
            },
            CircuitState::HalfOpen => {
                if self.config.strict_half_open && inner.probes_in_flight > 0 {
                    Admission::Rejected
                } else {
                    inner.probes_in_flight += 1;
                    self.metrics.record_half_open_attempt();
                    Admission::Admitted(Ticket {
                        generation: inner.generation,
                        probe: true,
                    })
                }
            }
        }
    }

    async fn on_success(&self, ticket: Option<Ticket>) {
        let mut inner = self.state.lock().await;
        if !inner.is_current(ticket) {
            debug!(circuit = %self.name, "Success from before the last transition, ignoring");
            return;
        }
        Self::free_probe_slot(&mut inner, ticket);

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, "probes succeeded");
                }
            }
            CircuitState::Open => {
                debug!(circuit = %self.name, "Success recorded while open, ignoring");
            }
        }
    }

    async fn on_failure(&self, category: ErrorCategory, ticket: Option<Ticket>) {
        let mut inner = self.state.lock().await;
        if !inner.is_current(ticket) {
            debug!(circuit = %self.name, category = %category, "Failure from before the last transition, ignoring");
            return;
        }
        Self::free_probe_slot(&mut inner, ticket);
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(FailureRecord { at: now, category });
                inner.prune(now, self.config.time_window);

                if inner.failures.len() >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = inner.failures.len(),
                        window_ms = self.config.time_window.as_millis() as u64,
                        "Failure threshold reached"
                    );
                    self.transition(&mut inner, CircuitState::Open, "failure threshold reached");
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, category = %category, "Probe failed");
                self.transition(&mut inner, CircuitState::Open, "probe failed");
            }
            CircuitState::Open => {
                // Already open, nothing to do
            }
        }
    }

    async fn release_probe(&self, ticket: Option<Ticket>) {
        let mut inner = self.state.lock().await;
        if inner.is_current(ticket) {
            Self::free_probe_slot(&mut inner, ticket);
        }
    }

    // Hook calls carry no ticket and are treated as probes
    fn free_probe_slot(inner: &mut BreakerState, ticket: Option<Ticket>) {
        if ticket.map_or(true, |ticket| ticket.probe) {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    // Caller holds the state lock
    fn transition(&self, inner: &mut BreakerState, to: CircuitState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        inner.success_count = 0;
        inner.generation += 1;
        match to {
            CircuitState::Open => {
                inner.next_attempt_at = Some(Instant::now() + self.config.timeout);
            }
            CircuitState::HalfOpen => {
                inner.probes_in_flight = 0;
            }
            CircuitState::Closed => {
                inner.failures.clear();
                inner.next_attempt_at = None;
                inner.probes_in_flight = 0;
            }
        }

        self.metrics.record_state_change(to);
        circuit_event!(self.name.as_str(), from, to, reason);
    }

    async fn reject(&self, started: Instant) -> OperationResult<T> {
        match &self.fallback {
            Some(fallback) => self.degrade(fallback.as_ref(), None, started, 0).await,
            None => OperationResult {
                success: false,
                value: None,
                error: Some(GuardError::CircuitOpen(self.name.clone())),
                error_category: None,
                from_fallback: false,
                execution_time: started.elapsed(),
                retry_count: 0,
                circuit_state: self.state().await,
            },
        }
    }

    // Fallback outcomes only touch fallback metrics, never circuit state
    async fn degrade(
        &self,
        fallback: &dyn Fallback<T>,
        primary: Option<(ErrorCategory, &GuardError)>,
        started: Instant,
        retry_count: usize,
    ) -> OperationResult<T> {
        let outcome = run_fallback(fallback, self.config.fallback_timeout).await;
        self.metrics.record_fallback(outcome.is_ok());

        let (success, value, error) = match (outcome, primary) {
            (Ok(value), _) => (true, Some(value), None),
            // Keep the primary failure visible next to the fallback's own
            (Err(GuardError::Fallback(message)), Some((_, primary_error))) => (
                false,
                None,
                Some(GuardError::Fallback(format!(
                    "{} (primary failure: {})",
                    message, primary_error
                ))),
            ),
            (Err(err), _) => (false, None, Some(err)),
        };

        OperationResult {
            success,
            value,
            error,
            error_category: primary.map(|(category, _)| category),
            from_fallback: true,
            execution_time: started.elapsed(),
            retry_count,
            circuit_state: self.state().await,
        }
    }
}
