// src/monitoring/tests/mod.rs
//! Tests for alert rules and the monitor

mod alert_tests;
