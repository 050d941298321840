// src/tests/mod.rs
//! Cross-module scenarios
