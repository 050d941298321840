use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{BoxError, GuardError};
use crate::resilience::classifier::{Classification, ErrorCategory, ErrorClassifier};
use crate::resilience::exponential_backoff::{ExponentialBackoff, RetryConfig};

/// The classified failure of the last attempt
#[derive(Debug)]
pub struct AttemptFailure {
    pub classification: Classification,
    pub error: GuardError,
}

/// What a retried call produced
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: std::result::Result<T, AttemptFailure>,
    /// Attempts actually made, the first one included
    pub attempts: usize,
    /// Latency of every individual attempt
    pub attempt_latencies: Vec<Duration>,
    /// Wall time for the whole call, backoff sleeps included
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn retry_count(&self) -> usize {
        self.attempts.saturating_sub(1)
    }

    pub fn last_error(&self) -> Option<&GuardError> {
        self.result.as_ref().err().map(|failure| &failure.error)
    }
}

/// Runs an operation with exponential backoff between attempts.
///
/// Only retryable categories (transient, timeout) are attempted again; every
/// other failure is returned after the attempt that produced it.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    classifier: Arc<ErrorClassifier>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, classifier: Arc<ErrorClassifier>) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let mut backoff = ExponentialBackoff::new(self.config.clone());
        let mut attempt_latencies = Vec::with_capacity(self.config.max_attempts);

        loop {
            let attempt_started = Instant::now();
            let outcome = time::timeout(self.config.attempt_timeout, operation()).await;
            attempt_latencies.push(attempt_started.elapsed());

            let failure = match outcome {
                Ok(Ok(value)) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt_latencies.len(),
                        attempt_latencies,
                        elapsed: started.elapsed(),
                    };
                }
                Ok(Err(err)) => self.classify(err.into()),
                Err(_) => AttemptFailure {
                    classification: ErrorCategory::Timeout.into(),
                    error: GuardError::Timeout(self.config.attempt_timeout),
                },
            };

            let category = failure.classification.category;
            if !category.is_retryable() {
                debug!(
                    attempt = attempt_latencies.len(),
                    category = %category,
                    "Failure is not retryable"
                );
                return self.finish(failure, attempt_latencies, started);
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    debug!(
                        attempt = attempt_latencies.len(),
                        category = %category,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "Retrying after failure"
                    );
                    time::sleep(delay).await;
                }
                None => {
                    debug!(
                        attempts = attempt_latencies.len(),
                        "Retry attempts exhausted"
                    );
                    return self.finish(failure, attempt_latencies, started);
                }
            }
        }
    }

    fn classify(&self, err: BoxError) -> AttemptFailure {
        let classification = self.classifier.classify(&*err);

        // Keep our own errors intact instead of nesting their messages
        let error = match err.downcast::<GuardError>() {
            Ok(guard) => *guard,
            Err(other) => GuardError::Operation {
                category: classification.category,
                message: other.to_string(),
            },
        };

        AttemptFailure {
            classification,
            error,
        }
    }

    fn finish<T>(
        &self,
        failure: AttemptFailure,
        attempt_latencies: Vec<Duration>,
        started: Instant,
    ) -> RetryOutcome<T> {
        RetryOutcome {
            result: Err(failure),
            attempts: attempt_latencies.len(),
            attempt_latencies,
            elapsed: started.elapsed(),
        }
    }
}
