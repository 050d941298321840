// src/test_utils.rs

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time;

use crate::config::CircuitConfig;
use crate::error::{BoxError, GuardError, Result};
use crate::resilience::{CategorizedError, ErrorCategory, Fallback, HealthProbe};

/// What one call to a `ScriptedOperation` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail(ErrorCategory),
    /// Never completes on its own; only a timeout ends it
    Hang,
}

/// A protected operation that plays back a fixed script of outcomes and then
/// repeats its last step
#[derive(Debug)]
pub struct ScriptedOperation {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicUsize,
}

impl ScriptedOperation {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(Step::Succeed),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new([step])
    }

    /// Append more steps to the script
    pub fn then(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> std::result::Result<usize, CategorizedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(step) = script.pop_front() {
                *last = step;
            }
            *last
        };

        match step {
            Step::Succeed => Ok(call),
            Step::Fail(category) => Err(CategorizedError::new(
                category,
                format!("scripted {} failure", category),
            )),
            Step::Hang => {
                time::sleep(Duration::from_secs(3_600)).await;
                Ok(call)
            }
        }
    }
}

/// Small thresholds and fast, deterministic backoff
pub fn test_config() -> CircuitConfig {
    CircuitConfig {
        failure_threshold: 3,
        success_threshold: 2,
        timeout: Duration::from_secs(2),
        time_window: Duration::from_secs(5),
        max_retry_attempts: 1,
        base_backoff_delay: Duration::from_millis(10),
        max_backoff_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        jitter: false,
        ..Default::default()
    }
}

/// Fallback that always fails and counts its invocations
#[derive(Debug, Default)]
pub struct FailingFallback {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Fallback<usize> for FailingFallback {
    async fn call(&self) -> std::result::Result<usize, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("fallback unavailable".into())
    }
}

/// Health probe whose outcome is switched from the test
#[derive(Debug, Default)]
pub struct MockProbe {
    pub should_fail: AtomicBool,
    pub pings: AtomicUsize,
}

impl MockProbe {
    pub fn set_failure(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(GuardError::HealthCheck("mock dependency down".to_string()));
        }
        Ok(())
    }
}
