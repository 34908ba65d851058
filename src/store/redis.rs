//! Redis-backed counters shared across service instances.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use super::{CounterStore, StoreError};

/// `INCR` + `EXPIRE` over a reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url`.
    ///
    /// # Errors
    /// Fails on an invalid URL or when the initial connection cannot be made.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1_u64).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let _: bool = conn.expire(key, seconds).await?;
        Ok(())
    }

    async fn has_expiry(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // TTL is -2 for a missing key and -1 for one without expiry.
        let ttl: i64 = conn.ttl(key).await?;
        Ok(ttl >= 0)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.inspect_err(|e| warn!(error = %e, "Redis health check failed"))
            .is_ok()
    }
}
