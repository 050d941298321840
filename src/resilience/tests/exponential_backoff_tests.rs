// src/resilience/tests/exponential_backoff_tests.rs

use std::time::Duration;

use crate::config::CircuitConfig;
use crate::resilience::{ExponentialBackoff, RetryConfig};

fn config(max_attempts: usize, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(initial_ms),
        max_backoff: Duration::from_millis(max_ms),
        backoff_multiplier: multiplier,
        use_jitter: false, // Disable jitter for deterministic testing
        attempt_timeout: Duration::from_secs(30),
    }
}

#[test]
fn test_backoff_increases_exponentially() {
    let mut backoff = ExponentialBackoff::new(config(5, 100, 10_000, 2.0));

    // Five attempts leave room for four retries
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));

    assert_eq!(backoff.next_backoff(), None);
    assert_eq!(backoff.retries(), 4);
}

#[test]
fn test_backoff_respects_max_backoff() {
    let mut backoff = ExponentialBackoff::new(config(6, 100, 300, 2.0));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));

    // 400ms would exceed the cap
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
}

#[test]
fn test_single_attempt_never_backs_off() {
    let mut backoff = ExponentialBackoff::new(config(1, 100, 10_000, 2.0));

    assert_eq!(backoff.next_backoff(), None);
    assert_eq!(backoff.retries(), 0);
}

#[test]
fn test_jitter_stays_within_half_to_full_delay() {
    let mut jittered = config(4, 100, 10_000, 2.0);
    jittered.use_jitter = true;

    // Repeat to cover a spread of random draws
    for _ in 0..50 {
        let mut backoff = ExponentialBackoff::new(jittered.clone());

        let first = backoff.next_backoff().unwrap();
        assert!(
            first >= Duration::from_millis(50) && first <= Duration::from_millis(100),
            "First backoff with jitter should be between 50ms and 100ms, got {:?}",
            first
        );

        let second = backoff.next_backoff().unwrap();
        assert!(
            second >= Duration::from_millis(100) && second <= Duration::from_millis(200),
            "Second backoff with jitter should be between 100ms and 200ms, got {:?}",
            second
        );

        let third = backoff.next_backoff().unwrap();
        assert!(
            third >= Duration::from_millis(200) && third <= Duration::from_millis(400),
            "Third backoff with jitter should be between 200ms and 400ms, got {:?}",
            third
        );
    }
}

#[test]
fn test_reset_restarts_backoff_sequence() {
    let mut backoff = ExponentialBackoff::new(config(3, 100, 10_000, 2.0));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), None);

    backoff.reset();

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_custom_backoff_configurations() {
    // High initial backoff
    let mut backoff = ExponentialBackoff::new(config(3, 1_000, 10_000, 2.0));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));

    // High multiplier
    let mut backoff = ExponentialBackoff::new(config(4, 100, 10_000, 5.0));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(500)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(2_500)));
}

#[test]
fn test_retry_config_follows_circuit_config() {
    let circuit = CircuitConfig {
        max_retry_attempts: 4,
        base_backoff_delay: Duration::from_millis(250),
        max_backoff_delay: Duration::from_secs(2),
        backoff_multiplier: 3.0,
        jitter: false,
        operation_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let retry = RetryConfig::from(&circuit);

    assert_eq!(retry.max_attempts, 4);
    assert_eq!(retry.initial_backoff, Duration::from_millis(250));
    assert_eq!(retry.max_backoff, Duration::from_secs(2));
    assert_eq!(retry.backoff_multiplier, 3.0);
    assert!(!retry.use_jitter);
    assert_eq!(retry.attempt_timeout, Duration::from_secs(5));
}
