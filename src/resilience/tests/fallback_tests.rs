// src/resilience/tests/fallback_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::error::{BoxError, GuardError};
use crate::resilience::{run_fallback, CircuitBreaker, CircuitState, Fallback, StaticFallback};
use crate::test_utils::{test_config, ScriptedOperation, Step};
use crate::ErrorCategory;

#[tokio::test]
async fn test_static_fallback_returns_its_value() {
    let fallback = StaticFallback::new(vec!["cached".to_string()]);

    let value = run_fallback(&fallback, Duration::from_secs(1)).await.unwrap();

    assert_eq!(value, vec!["cached".to_string()]);
}

#[tokio::test]
async fn test_closure_is_a_fallback() {
    let fallback = || async { Ok::<_, BoxError>(7u32) };

    let value: u32 = run_fallback(&fallback, Duration::from_secs(1)).await.unwrap();

    assert_eq!(value, 7);
}

#[tokio::test]
async fn test_fallback_error_is_wrapped() {
    let fallback = || async { Err::<u32, BoxError>("cache miss".into()) };

    let err = run_fallback::<u32, _>(&fallback, Duration::from_secs(1))
        .await
        .unwrap_err();

    match err {
        GuardError::Fallback(message) => assert!(message.contains("cache miss")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_fallback_times_out() {
    let fallback = || async {
        time::sleep(Duration::from_secs(60)).await;
        Ok::<_, BoxError>(1u32)
    };

    let err = run_fallback::<u32, _>(&fallback, Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, GuardError::Fallback(ref message) if message.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_timeout_does_not_touch_circuit() {
    let slow: Arc<dyn Fallback<usize>> = Arc::new(|| async {
        time::sleep(Duration::from_secs(60)).await;
        Ok::<_, BoxError>(0usize)
    });
    let breaker = CircuitBreaker::new("slow-fallback", test_config()).with_fallback(slow);
    let op = ScriptedOperation::always(Step::Fail(ErrorCategory::Transient));

    let result = breaker.execute(|| op.call()).await;

    assert!(!result.success);
    assert!(result.from_fallback);
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.failure_count().await, 1);
    assert_eq!(breaker.metrics().fallback_failures, 1);
    assert!(result.execution_time >= test_config().fallback_timeout);
}
