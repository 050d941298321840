use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,circuit_guard=trace
pub fn init() {
    INIT.call_once(|| {
        // Default to 'info' level if not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true) // Useful for debugging concurrency issues
                    .with_line_number(true),
            )
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging circuit state transitions
#[macro_export]
macro_rules! circuit_event {
    ($circuit:expr, $from:expr, $to:expr, $reason:expr) => {
        tracing::info!(
            circuit = $circuit,
            from = %$from,
            to = %$to,
            reason = $reason,
            "Circuit state transition"
        )
    };
}

/// Macro for logging the outcome of a protected call with timing
#[macro_export]
macro_rules! operation_outcome {
    ($circuit:expr, $result:expr) => {
        tracing::debug!(
            circuit = $circuit,
            success = $result.success,
            from_fallback = $result.from_fallback,
            retries = $result.retry_count,
            elapsed_ms = $result.execution_time.as_millis() as u64,
            state = %$result.circuit_state,
            "Protected operation"
        )
    };
}
