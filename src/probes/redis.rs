// src/probes/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::resilience::HealthProbe;

/// Where and how to reach Redis
#[derive(Debug, Clone)]
pub struct RedisProbeConfig {
    pub url: String,
    /// Bound on connecting and on every PING
    pub connection_timeout: Duration,
}

impl RedisProbeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: Duration::from_secs(2),
        }
    }
}

/// Health probe for a Redis server.
///
/// The managed connection reconnects on its own; clone it through
/// `connection()` to run commands under a circuit breaker.
pub struct RedisProbe {
    connection: ConnectionManager,
    config: RedisProbeConfig,
}

impl fmt::Debug for RedisProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisProbe")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

impl RedisProbe {
    /// Connect to Redis, giving up after `connection_timeout`
    pub async fn connect(config: RedisProbeConfig) -> Result<Self> {
        // Opening the client does not connect yet
        let client = Client::open(config.url.as_str())?;

        let connection =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(GuardError::Timeout(config.connection_timeout));
                }
            };

        debug!(url = %config.url, "Connected to Redis");
        Ok(Self { connection, config })
    }

    /// A handle to the shared connection
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn config(&self) -> &RedisProbeConfig {
        &self.config
    }
}

#[async_trait]
impl HealthProbe for RedisProbe {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let ping_future = redis::AsyncCommands::ping::<String>(&mut conn);

        let reply = match tokio::time::timeout(self.config.connection_timeout, ping_future).await {
            Ok(reply) => reply?,
            Err(_) => return Err(GuardError::Timeout(self.config.connection_timeout)),
        };

        if reply == "PONG" {
            Ok(())
        } else {
            Err(GuardError::HealthCheck(format!(
                "Unexpected response from Redis PING: {}",
                reply
            )))
        }
    }
}
