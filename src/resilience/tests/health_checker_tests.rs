// src/resilience/tests/health_checker_tests.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::error::{GuardError, Result};
use crate::resilience::{HealthCheckConfig, HealthChecker, HealthProbe};
use crate::test_utils::MockProbe;

/// Probe that can be told to answer slower than the check timeout
#[derive(Debug, Default)]
struct SlowProbe {
    add_delay: AtomicBool,
    pings: AtomicUsize,
}

impl SlowProbe {
    fn set_delay(&self, delay: bool) {
        self.add_delay.store(delay, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for SlowProbe {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.add_delay.load(Ordering::SeqCst) {
            time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }
}

fn fast_config() -> HealthCheckConfig {
    HealthCheckConfig {
        check_interval: Duration::from_millis(50), // Fast for testing
        check_timeout: Duration::from_millis(25),  // Short timeout
    }
}

fn create_test_health_checker() -> (Arc<HealthChecker>, Arc<MockProbe>) {
    let mock = Arc::new(MockProbe::default());
    let checker = Arc::new(HealthChecker::new(
        "mock",
        mock.clone() as Arc<dyn HealthProbe>,
        fast_config(),
    ));
    (checker, mock)
}

#[tokio::test]
async fn test_check_once_tracks_failures() {
    let (checker, mock) = create_test_health_checker();

    assert!(checker.is_healthy(), "Should start in healthy state");
    assert!(checker.check_once().await);

    mock.set_failure(true);
    assert!(!checker.check_once().await);
    assert!(!checker.check_once().await);
    assert!(!checker.check_once().await);
    assert_eq!(checker.consecutive_failures(), 3);

    let snapshot = checker.snapshot();
    assert_eq!(snapshot.name, "mock");
    assert!(!snapshot.healthy);
    assert_eq!(snapshot.total_checks, 4);
    assert_eq!(snapshot.total_failures, 3);
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|err| err.contains("mock dependency down")));
    assert!(snapshot.last_checked_at.is_some());

    // One success clears the streak and the last error
    mock.set_failure(false);
    assert!(checker.check_once().await);
    let snapshot = checker.snapshot();
    assert!(snapshot.healthy);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert_eq!(snapshot.total_failures, 3);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_handling() {
    let probe = Arc::new(SlowProbe::default());
    let checker = HealthChecker::new("slow", probe.clone() as Arc<dyn HealthProbe>, fast_config());

    probe.set_delay(true);
    assert!(!checker.check_once().await, "Should be unhealthy after timeout");
    assert!(checker
        .snapshot()
        .last_error
        .is_some_and(|err| err.contains("timed out")));

    probe.set_delay(false);
    assert!(checker.check_once().await, "Should be healthy after removing delay");
    assert_eq!(probe.pings.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_health_status_updates() {
    let (health_checker, mock) = create_test_health_checker();

    let handle = Arc::clone(&health_checker).start();

    // Simulate dependency failure
    mock.set_failure(true);
    time::sleep(Duration::from_millis(75)).await;
    assert!(
        !health_checker.is_healthy(),
        "Should be unhealthy after failure"
    );

    // Restore the dependency
    mock.set_failure(false);
    time::sleep(Duration::from_millis(75)).await;
    assert!(
        health_checker.is_healthy(),
        "Should be healthy after recovery"
    );

    health_checker.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_checking_stops_on_request() {
    let (health_checker, mock) = create_test_health_checker();

    let handle = Arc::clone(&health_checker).start();

    // Ticks at 0, 50, 100, 150 and 200ms
    time::sleep(Duration::from_millis(220)).await;
    let pings = mock.pings.load(Ordering::SeqCst);
    assert_eq!(pings, 5);

    health_checker.stop();
    handle.await.unwrap();

    time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        mock.pings.load(Ordering::SeqCst),
        pings,
        "No probes after stop"
    );
}

#[tokio::test(start_paused = true)]
async fn test_checker_can_restart_after_stop() {
    let (health_checker, mock) = create_test_health_checker();

    let handle = Arc::clone(&health_checker).start();
    time::sleep(Duration::from_millis(10)).await;
    health_checker.stop();
    handle.await.unwrap();
    let before = mock.pings.load(Ordering::SeqCst);

    let handle = Arc::clone(&health_checker).start();
    time::sleep(Duration::from_millis(120)).await;
    assert!(mock.pings.load(Ordering::SeqCst) > before);

    health_checker.stop();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_probe_errors_surface_in_snapshot() {
    struct Refusing;

    #[async_trait]
    impl HealthProbe for Refusing {
        async fn ping(&self) -> Result<()> {
            Err(GuardError::HealthCheck("unexpected reply: LOADING".to_string()))
        }
    }

    let checker = HealthChecker::new("refusing", Arc::new(Refusing), fast_config());
    checker.check_once().await;

    let snapshot = checker.snapshot();
    assert_eq!(snapshot.consecutive_failures, 1);
    assert!(snapshot
        .last_error
        .is_some_and(|err| err.contains("LOADING")));
}
