// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GuardError, Result};

/// Configuration for a single circuit. Immutable once the circuit is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Countable failures inside `time_window` that trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Consecutive successes in half-open state needed to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,

    /// How long the circuit stays open before a probe is let through
    #[serde(default = "default_open_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Sliding window over which failures are counted
    #[serde(default = "default_time_window", with = "duration_serde")]
    pub time_window: Duration,

    /// Total attempts per call, the first one included
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: usize,

    /// Delay before the first retry
    #[serde(default = "default_base_backoff", with = "duration_serde")]
    pub base_backoff_delay: Duration,

    /// Upper bound for a single retry delay
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff_delay: Duration,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Deadline for a fallback invocation
    #[serde(default = "default_fallback_timeout", with = "duration_serde")]
    pub fallback_timeout: Duration,

    /// Deadline for every single attempt of the protected operation
    #[serde(default = "default_operation_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,

    /// Calls slower than this are counted as slow
    #[serde(default = "default_slow_call_threshold", with = "duration_serde")]
    pub slow_call_threshold: Duration,

    /// Number of response-time samples kept for averages and percentiles
    #[serde(default = "default_response_time_samples")]
    pub response_time_samples: usize,

    /// Admit a single probe at a time while half-open
    #[serde(default)]
    pub strict_half_open: bool,
}

fn default_failure_threshold() -> usize {
    5
}

fn default_success_threshold() -> usize {
    3
}

fn default_open_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_time_window() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retry_attempts() -> usize {
    3
}

fn default_base_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_fallback_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_slow_call_threshold() -> Duration {
    Duration::from_secs(1)
}

fn default_response_time_samples() -> usize {
    100
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout: default_open_timeout(),
            time_window: default_time_window(),
            max_retry_attempts: default_max_retry_attempts(),
            base_backoff_delay: default_base_backoff(),
            max_backoff_delay: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            fallback_timeout: default_fallback_timeout(),
            operation_timeout: default_operation_timeout(),
            slow_call_threshold: default_slow_call_threshold(),
            response_time_samples: default_response_time_samples(),
            strict_half_open: false,
        }
    }
}

impl CircuitConfig {
    /// Check the configuration for values the breaker cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(GuardError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(GuardError::Config(
                "success_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(GuardError::Config(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(GuardError::Config(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.base_backoff_delay > self.max_backoff_delay {
            return Err(GuardError::Config(format!(
                "base_backoff_delay ({:?}) exceeds max_backoff_delay ({:?})",
                self.base_backoff_delay, self.max_backoff_delay
            )));
        }
        for (name, value) in [
            ("timeout", self.timeout),
            ("time_window", self.time_window),
            ("fallback_timeout", self.fallback_timeout),
            ("operation_timeout", self.operation_timeout),
        ] {
            if value.is_zero() {
                return Err(GuardError::Config(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    /// Build a circuit configuration from `CIRCUIT_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            failure_threshold: env_or("CIRCUIT_FAILURE_THRESHOLD", defaults.failure_threshold)?,
            success_threshold: env_or("CIRCUIT_SUCCESS_THRESHOLD", defaults.success_threshold)?,
            timeout: env_millis_or("CIRCUIT_TIMEOUT_MS", defaults.timeout)?,
            time_window: env_millis_or("CIRCUIT_TIME_WINDOW_MS", defaults.time_window)?,
            max_retry_attempts: env_or("CIRCUIT_MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts)?,
            base_backoff_delay: env_millis_or(
                "CIRCUIT_BASE_BACKOFF_MS",
                defaults.base_backoff_delay,
            )?,
            max_backoff_delay: env_millis_or("CIRCUIT_MAX_BACKOFF_MS", defaults.max_backoff_delay)?,
            backoff_multiplier: env_or(
                "CIRCUIT_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            )?,
            jitter: env_or("CIRCUIT_JITTER", defaults.jitter)?,
            fallback_timeout: env_millis_or(
                "CIRCUIT_FALLBACK_TIMEOUT_MS",
                defaults.fallback_timeout,
            )?,
            operation_timeout: env_millis_or(
                "CIRCUIT_OPERATION_TIMEOUT_MS",
                defaults.operation_timeout,
            )?,
            slow_call_threshold: env_millis_or(
                "CIRCUIT_SLOW_CALL_MS",
                defaults.slow_call_threshold,
            )?,
            response_time_samples: env_or(
                "CIRCUIT_RESPONSE_TIME_SAMPLES",
                defaults.response_time_samples,
            )?,
            strict_half_open: env_or("CIRCUIT_STRICT_HALF_OPEN", defaults.strict_half_open)?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the monitor and its health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How often circuit metrics are collected and rules evaluated
    #[serde(default = "default_monitoring_interval", with = "duration_serde")]
    pub monitoring_interval: Duration,

    /// How often dependencies are actively probed
    #[serde(default = "default_health_check_interval", with = "duration_serde")]
    pub health_check_interval: Duration,

    /// Timeout for a single health probe
    #[serde(default = "default_health_check_timeout", with = "duration_serde")]
    pub health_check_timeout: Duration,

    /// Maximum number of alerts kept in history
    #[serde(default = "default_alert_history_size")]
    pub alert_history_size: usize,

    /// Maximum number of metric snapshots kept for reporting
    #[serde(default = "default_metrics_history_size")]
    pub metrics_history_size: usize,

    /// Number of alerts included in the comprehensive status
    #[serde(default = "default_recent_alerts_limit")]
    pub recent_alerts_limit: usize,
}

fn default_monitoring_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_alert_history_size() -> usize {
    1_000
}

fn default_metrics_history_size() -> usize {
    288
}

fn default_recent_alerts_limit() -> usize {
    20
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: default_monitoring_interval(),
            health_check_interval: default_health_check_interval(),
            health_check_timeout: default_health_check_timeout(),
            alert_history_size: default_alert_history_size(),
            metrics_history_size: default_metrics_history_size(),
            recent_alerts_limit: default_recent_alerts_limit(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.monitoring_interval.is_zero() || self.health_check_interval.is_zero() {
            return Err(GuardError::Config(
                "monitoring and health check intervals must be non-zero".to_string(),
            ));
        }
        if self.health_check_timeout.is_zero() {
            return Err(GuardError::Config(
                "health_check_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a monitor configuration from `MONITOR_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            monitoring_interval: env_millis_or(
                "MONITOR_INTERVAL_MS",
                defaults.monitoring_interval,
            )?,
            health_check_interval: env_millis_or(
                "MONITOR_HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval,
            )?,
            health_check_timeout: env_millis_or(
                "MONITOR_HEALTH_CHECK_TIMEOUT_MS",
                defaults.health_check_timeout,
            )?,
            alert_history_size: env_or("MONITOR_ALERT_HISTORY_SIZE", defaults.alert_history_size)?,
            metrics_history_size: env_or(
                "MONITOR_METRICS_HISTORY_SIZE",
                defaults.metrics_history_size,
            )?,
            recent_alerts_limit: env_or(
                "MONITOR_RECENT_ALERTS_LIMIT",
                defaults.recent_alerts_limit,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Top-level configuration for a process using the guard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Defaults applied to circuits registered without their own config
    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Optional Redis dependency to probe
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl GuardConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: GuardConfig = serde_json::from_str(raw)?;
        config.circuit.validate()?;
        config.monitor.validate()?;
        Ok(config)
    }

    /// Read the configuration from the environment (call `dotenv()` first to
    /// pick up a `.env` file)
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            circuit: CircuitConfig::from_env()?,
            monitor: MonitorConfig::from_env()?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| GuardError::Config(format!("invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_millis_or(key: &str, default: Duration) -> Result<Duration> {
    let millis = env_or(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        assert_ok!(CircuitConfig::default().validate());
        assert_ok!(MonitorConfig::default().validate());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_threshold = CircuitConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert_err!(zero_threshold.validate());

        let shrinking_backoff = CircuitConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert_err!(shrinking_backoff.validate());

        let inverted_backoff = CircuitConfig {
            base_backoff_delay: Duration::from_secs(20),
            max_backoff_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert_err!(inverted_backoff.validate());
    }

    #[test]
    fn test_json_uses_defaults_for_missing_fields() {
        let config = GuardConfig::from_json(
            r#"{"circuit": {"failure_threshold": 2, "timeout": 1500}, "monitor": {"monitoring_interval": 250}}"#,
        )
        .unwrap();

        assert_eq!(config.circuit.failure_threshold, 2);
        assert_eq!(config.circuit.timeout, Duration::from_millis(1500));
        assert_eq!(config.circuit.success_threshold, 3);
        assert_eq!(config.monitor.monitoring_interval, Duration::from_millis(250));
        assert_eq!(config.monitor.alert_history_size, 1_000);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_json_validation_errors_surface() {
        let result = GuardConfig::from_json(r#"{"circuit": {"success_threshold": 0}}"#);
        assert!(matches!(result, Err(GuardError::Config(_))));

        let malformed = GuardConfig::from_json("{not json");
        assert!(matches!(malformed, Err(GuardError::Serialization(_))));
    }
}
