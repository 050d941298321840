// src/resilience/tests/retry_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::config::CircuitConfig;
use crate::error::GuardError;
use crate::resilience::{ErrorCategory, ErrorClassifier, RetryConfig, RetryExecutor};
use crate::test_utils::{ScriptedOperation, Step};

fn executor(max_attempts: usize, base: Duration) -> RetryExecutor {
    let config = CircuitConfig {
        max_retry_attempts: max_attempts,
        base_backoff_delay: base,
        max_backoff_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
        jitter: false,
        ..Default::default()
    };
    RetryExecutor::new(RetryConfig::from(&config), Arc::new(ErrorClassifier::default()))
}

#[tokio::test(start_paused = true)]
async fn test_delays_between_attempts_follow_schedule() {
    let retry = executor(3, Duration::from_secs(1));
    let started = Instant::now();
    let mut offsets = Vec::new();

    let outcome = retry
        .run(|| {
            offsets.push(started.elapsed());
            async { Err::<(), _>(GuardError::Timeout(Duration::from_secs(1))) }
        })
        .await;

    // Attempts start at t=0, t=1 (after 1.0s) and t=3 (after 2.0s more)
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(3),
        ]
    );
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.retry_count(), 2);
    assert_eq!(outcome.elapsed, Duration::from_secs(3));
    assert!(matches!(outcome.last_error(), Some(GuardError::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn test_success_stops_retrying() {
    let retry = executor(5, Duration::from_millis(100));
    let op = ScriptedOperation::new([Step::Fail(ErrorCategory::Transient), Step::Succeed]);

    let outcome = retry.run(|| op.call()).await;

    assert_eq!(outcome.result.ok(), Some(2));
    assert_eq!(outcome.attempts, 2);
    assert_eq!(op.calls(), 2);
}

#[tokio::test]
async fn test_non_retryable_categories_abort_immediately() {
    for category in [
        ErrorCategory::Query,
        ErrorCategory::Persistent,
        ErrorCategory::System,
    ] {
        let retry = executor(4, Duration::from_millis(10));
        let op = ScriptedOperation::always(Step::Fail(category));

        let outcome = retry.run(|| op.call()).await;

        assert_eq!(outcome.attempts, 1, "{} must not be retried", category);
        let failure = outcome.result.unwrap_err();
        assert_eq!(failure.classification.category, category);
        assert_eq!(failure.classification.counts_as_failure, category != ErrorCategory::Query);
    }
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_retried_as_timeout() {
    let mut config = RetryConfig::from(&CircuitConfig {
        max_retry_attempts: 3,
        base_backoff_delay: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    });
    config.attempt_timeout = Duration::from_millis(50);
    let retry = RetryExecutor::new(config, Arc::new(ErrorClassifier::default()));
    let op = ScriptedOperation::new([Step::Hang, Step::Hang, Step::Succeed]);

    let outcome = retry.run(|| op.call()).await;

    assert_eq!(outcome.result.ok(), Some(3));
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.attempt_latencies[0], Duration::from_millis(50));
    assert_eq!(outcome.attempt_latencies[1], Duration::from_millis(50));
}

#[tokio::test]
async fn test_plain_errors_are_classified_by_message() {
    let retry = executor(1, Duration::from_millis(10));

    let outcome = retry
        .run(|| async { Err::<(), _>("ERROR: syntax error at or near \"SELEC\"") })
        .await;

    let failure = outcome.result.unwrap_err();
    assert_eq!(failure.classification.category, ErrorCategory::Query);
    match failure.error {
        GuardError::Operation { category, message } => {
            assert_eq!(category, ErrorCategory::Query);
            assert!(message.contains("syntax error"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sleeps_do_not_block_other_tasks() {
    let retry = executor(2, Duration::from_secs(5));
    let op = ScriptedOperation::always(Step::Fail(ErrorCategory::Transient));

    let other = tokio::spawn(async {
        time::sleep(Duration::from_secs(1)).await;
        Instant::now()
    });
    let started = Instant::now();
    let outcome = retry.run(|| op.call()).await;

    let other_finished = other.await.unwrap();
    assert!(other_finished - started < Duration::from_secs(5));
    assert_eq!(outcome.attempts, 2);
}
