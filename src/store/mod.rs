//! Shared counting store backing the rate limiter.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Atomic per-key counter with expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the post-increment value. A missing or
    /// expired key starts again from zero.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Expire `key` after `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether `key` exists and carries an expiry.
    async fn has_expiry(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether the backing store is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}
