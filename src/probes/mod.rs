// src/probes/mod.rs
//! Ready-made `HealthProbe` implementations for common dependencies.

mod redis;

pub use self::redis::{RedisProbe, RedisProbeConfig};
