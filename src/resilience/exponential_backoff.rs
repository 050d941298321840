use std::time::Duration;

use crate::config::CircuitConfig;

/// Configuration for retry strategy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff
    pub use_jitter: bool,
    /// Deadline for each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::from(&CircuitConfig::default())
    }
}

impl From<&CircuitConfig> for RetryConfig {
    fn from(config: &CircuitConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts.max(1),
            initial_backoff: config.base_backoff_delay,
            max_backoff: config.max_backoff_delay,
            backoff_multiplier: config.backoff_multiplier,
            use_jitter: config.jitter,
            attempt_timeout: config.operation_timeout,
        }
    }
}

/// Exponential backoff schedule for one call.
///
/// The n-th retry waits `min(initial * multiplier^(n-1), max)`, optionally
/// scaled into [50%, 100%] by jitter.
pub struct ExponentialBackoff {
    /// Number of retries handed out
    retries: usize,
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { retries: 0, config }
    }

    /// Delay before the next retry, or None once all attempts are used
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let exp = (self.retries - 1) as i32;
        let base_nanos = self.config.initial_backoff.as_nanos() as f64;
        let backoff_nanos = base_nanos * self.config.backoff_multiplier.powi(exp);
        let capped_nanos = backoff_nanos.min(self.config.max_backoff.as_nanos() as f64);

        let jittered_nanos = if self.config.use_jitter {
            // random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            capped_nanos * jitter
        } else {
            capped_nanos
        };

        Some(Duration::from_nanos(jittered_nanos.max(0.0) as u64))
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.retries = 0;
    }
}
