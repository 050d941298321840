// src/resilience/tests/mod.rs
//! Tests for resilience features

mod exponential_backoff_tests;
mod fallback_tests;
mod health_checker_tests;
mod retry_tests;
