use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::classifier::ErrorCategory;

/// Point-in-time copy of a circuit's metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_retries: u64,
    /// Calls turned away without running the operation
    pub rejected_requests: u64,
    pub circuit_opens: u64,
    pub circuit_closes: u64,
    pub half_open_attempts: u64,
    pub fallback_executions: u64,
    pub fallback_successes: u64,
    pub fallback_failures: u64,
    pub slow_operation_count: u64,
    pub failures_by_category: BTreeMap<ErrorCategory, u64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_state_change_at: Option<DateTime<Utc>>,
    /// Number of response-time samples the averages below are based on
    pub sample_count: usize,
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

impl MetricsSnapshot {
    /// Share of executed calls that failed
    pub fn failure_rate(&self) -> f64 {
        ratio(self.total_failures, self.total_requests)
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.total_successes, self.total_requests)
    }

    /// Retries per executed call
    pub fn retry_rate(&self) -> f64 {
        ratio(self.total_retries, self.total_requests)
    }

    /// Share of all calls, rejected ones included, that were served by the fallback
    pub fn fallback_rate(&self) -> f64 {
        ratio(
            self.fallback_executions,
            self.total_requests + self.rejected_requests,
        )
    }

    pub fn rejection_rate(&self) -> f64 {
        ratio(
            self.rejected_requests,
            self.total_requests + self.rejected_requests,
        )
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_retries: u64,
    rejected_requests: u64,
    circuit_opens: u64,
    circuit_closes: u64,
    half_open_attempts: u64,
    fallback_executions: u64,
    fallback_successes: u64,
    fallback_failures: u64,
    slow_operation_count: u64,
    failures_by_category: BTreeMap<ErrorCategory, u64>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct MetricsState {
    counters: Counters,
    /// Most recent response times, oldest first
    response_times: VecDeque<Duration>,
}

/// Thread-safe per-circuit counters and a bounded window of response times
#[derive(Debug)]
pub struct MetricsAggregator {
    state: Mutex<MetricsState>,
    sample_capacity: usize,
    slow_call_threshold: Duration,
}

impl MetricsAggregator {
    pub fn new(sample_capacity: usize, slow_call_threshold: Duration) -> Self {
        let sample_capacity = sample_capacity.max(1);
        Self {
            state: Mutex::new(MetricsState {
                counters: Counters::default(),
                response_times: VecDeque::with_capacity(sample_capacity),
            }),
            sample_capacity,
            slow_call_threshold,
        }
    }

    // A poisoned lock only means another recorder panicked mid-update; the
    // counters are still usable
    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the final outcome of one executed call
    pub fn record_request(&self, success: bool, latency: Duration, category: Option<ErrorCategory>) {
        let mut state = self.lock();
        let now = Utc::now();

        state.counters.total_requests += 1;
        if success {
            state.counters.total_successes += 1;
            state.counters.last_success_at = Some(now);
        } else {
            state.counters.total_failures += 1;
            state.counters.last_failure_at = Some(now);
            if let Some(category) = category {
                *state
                    .counters
                    .failures_by_category
                    .entry(category)
                    .or_insert(0) += 1;
            }
        }

        if latency > self.slow_call_threshold {
            state.counters.slow_operation_count += 1;
        }

        if state.response_times.len() == self.sample_capacity {
            state.response_times.pop_front();
        }
        state.response_times.push_back(latency);
    }

    pub fn record_retries(&self, retries: usize) {
        if retries > 0 {
            self.lock().counters.total_retries += retries as u64;
        }
    }

    pub fn record_rejection(&self) {
        self.lock().counters.rejected_requests += 1;
    }

    pub fn record_half_open_attempt(&self) {
        self.lock().counters.half_open_attempts += 1;
    }

    pub fn record_state_change(&self, new_state: CircuitState) {
        let mut state = self.lock();
        match new_state {
            CircuitState::Open => state.counters.circuit_opens += 1,
            CircuitState::Closed => state.counters.circuit_closes += 1,
            CircuitState::HalfOpen => {}
        }
        state.counters.last_state_change_at = Some(Utc::now());
    }

    pub fn record_fallback(&self, success: bool) {
        let mut state = self.lock();
        state.counters.fallback_executions += 1;
        if success {
            state.counters.fallback_successes += 1;
        } else {
            state.counters.fallback_failures += 1;
        }
    }

    /// Clear all counters and samples
    pub fn reset(&self) {
        let mut state = self.lock();
        state.counters = Counters::default();
        state.response_times.clear();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let counters = &state.counters;

        let mut sorted: Vec<f64> = state
            .response_times
            .iter()
            .map(|latency| latency.as_secs_f64() * 1000.0)
            .collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        MetricsSnapshot {
            total_requests: counters.total_requests,
            total_successes: counters.total_successes,
            total_failures: counters.total_failures,
            total_retries: counters.total_retries,
            rejected_requests: counters.rejected_requests,
            circuit_opens: counters.circuit_opens,
            circuit_closes: counters.circuit_closes,
            half_open_attempts: counters.half_open_attempts,
            fallback_executions: counters.fallback_executions,
            fallback_successes: counters.fallback_successes,
            fallback_failures: counters.fallback_failures,
            slow_operation_count: counters.slow_operation_count,
            failures_by_category: counters.failures_by_category.clone(),
            last_success_at: counters.last_success_at,
            last_failure_at: counters.last_failure_at,
            last_state_change_at: counters.last_state_change_at,
            sample_count: sorted.len(),
            avg_response_time_ms: avg,
            p50_response_time_ms: percentile(&sorted, 0.50),
            p95_response_time_ms: percentile(&sorted, 0.95),
            p99_response_time_ms: percentile(&sorted, 0.99),
            max_response_time_ms: sorted.last().copied().unwrap_or(0.0),
        }
    }
}

/// Nearest-rank percentile over an ascending slice
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
