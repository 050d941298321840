use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use crate::error::{BoxError, GuardError, Result};

/// A degraded-mode substitute for the primary operation.
///
/// Any `Fn() -> impl Future<Output = Result<T, BoxError>>` closure is a
/// fallback, so most callers never implement this by hand.
#[async_trait]
pub trait Fallback<T>: Send + Sync {
    async fn call(&self) -> std::result::Result<T, BoxError>;
}

#[async_trait]
impl<T, F, Fut> Fallback<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
{
    async fn call(&self) -> std::result::Result<T, BoxError> {
        (self)().await
    }
}

/// Serves a fixed value, e.g. a cached result or an empty default
#[derive(Debug, Clone)]
pub struct StaticFallback<T> {
    value: T,
}

impl<T> StaticFallback<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

#[async_trait]
impl<T> Fallback<T> for StaticFallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn call(&self) -> std::result::Result<T, BoxError> {
        Ok(self.value.clone())
    }
}

/// Run a fallback under its own deadline.
///
/// Errors are flattened into `GuardError::Fallback`; they are never
/// classified, so they cannot feed back into circuit state.
pub async fn run_fallback<T, H>(handler: &H, timeout: Duration) -> Result<T>
where
    H: Fallback<T> + ?Sized,
{
    match time::timeout(timeout, handler.call()).await {
        Ok(Ok(value)) => {
            debug!("Fallback succeeded");
            Ok(value)
        }
        Ok(Err(err)) => {
            warn!(error = %err, "Fallback failed");
            Err(GuardError::Fallback(err.to_string()))
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Fallback timed out");
            Err(GuardError::Fallback(format!("timed out after {:?}", timeout)))
        }
    }
}
