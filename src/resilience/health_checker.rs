use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;

/// A cheap no-op request against a dependency, e.g. `PING` or `SELECT 1`
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// How often to probe the dependency
    pub check_interval: Duration,
    /// Timeout for a single probe
    pub check_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        HealthCheckConfig::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for HealthCheckConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            check_interval: config.health_check_interval,
            check_timeout: config.health_check_timeout,
        }
    }
}

/// Exported health of one dependency
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub name: String,
    pub healthy: bool,
    pub consecutive_failures: usize,
    pub total_checks: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Actively probes one dependency, independent of any breaker state
pub struct HealthChecker {
    name: String,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
    /// Flag indicating if the dependency is healthy
    is_healthy: AtomicBool,
    consecutive_failures: AtomicUsize,
    total_checks: AtomicU64,
    total_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_checked_at: Mutex<Option<DateTime<Utc>>>,
    /// Set to true to stop the background task
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("name", &self.name)
            .field("is_healthy", &self.is_healthy.load(Ordering::SeqCst))
            .field("config", &self.config)
            .finish()
    }
}

impl HealthChecker {
    pub fn new(name: impl Into<String>, probe: Arc<dyn HealthProbe>, config: HealthCheckConfig) -> Self {
        Self {
            name: name.into(),
            probe,
            config,
            is_healthy: AtomicBool::new(true), // Assume healthy initially
            consecutive_failures: AtomicUsize::new(0),
            total_checks: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
            last_checked_at: Mutex::new(None),
            shutdown: watch::channel(false).0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one probe and update the health record
    pub async fn check_once(&self) -> bool {
        let healthy = match time::timeout(self.config.check_timeout, self.probe.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(dependency = %self.name, error = %e, "Health check failed");
                self.set_last_error(Some(e.to_string()));
                false
            }
            Err(_) => {
                error!(
                    dependency = %self.name,
                    "Health check timed out after {:?}", self.config.check_timeout
                );
                self.set_last_error(Some(format!(
                    "timed out after {:?}",
                    self.config.check_timeout
                )));
                false
            }
        };

        self.total_checks.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut checked) = self.last_checked_at.lock() {
            *checked = Some(Utc::now());
        }

        if healthy {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.set_last_error(None);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
            self.total_failures.fetch_add(1, Ordering::SeqCst);
        }

        let previous_status = self.is_healthy.swap(healthy, Ordering::SeqCst);
        if previous_status != healthy {
            if healthy {
                info!(dependency = %self.name, "Dependency is now healthy");
            } else {
                warn!(dependency = %self.name, "Dependency is now unhealthy");
            }
        }

        healthy
    }

    /// Start the health checker background task
    pub fn start(self: Arc<Self>) -> task::JoinHandle<()> {
        self.shutdown.send_replace(false);
        let mut shutdown_rx = self.shutdown.subscribe();

        task::spawn(async move {
            let mut interval_timer = time::interval(self.config.check_interval);

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {
                        self.check_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            debug!(dependency = %self.name, "Health checker task stopped");
        })
    }

    /// Stop the health checker; a probe already running completes first
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            name: self.name.clone(),
            healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures(),
            total_checks: self.total_checks.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            last_error: self.last_error.lock().ok().and_then(|err| err.clone()),
            last_checked_at: self.last_checked_at.lock().ok().and_then(|at| *at),
        }
    }

    fn set_last_error(&self, err: Option<String>) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = err;
        }
    }
}
