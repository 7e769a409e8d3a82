//! Bucketed counter stores.
//!
//! The limiter only needs four hash operations from its backing store. Any
//! backend offering them (Redis, an embedded map, a SQL table emulating a
//! hash) can be plugged in by implementing [`BucketStore`].

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store operation timed out")]
    Timeout,
    #[error("Store operation was cancelled")]
    Cancelled,
    #[error("Store protocol error: {0}")]
    Protocol(String),
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Hash-map store holding one entry per rate limit key, with one field per
/// time bucket.
///
/// Only `increment_field` has to be atomic across concurrent callers; the
/// limiter tolerates stale reads from the other operations.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Add `delta` to `field` under `key`, creating either if absent, and
    /// return the new value.
    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Snapshot every field under `key`. A missing key yields an empty map.
    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Remove one field from `key`.
    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError>;

    /// Set or refresh the time-to-live of the whole entry.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: BucketStore + ?Sized> BucketStore for Arc<T> {
    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        (**self).increment_field(key, field, delta).await
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        (**self).get_all_fields(key).await
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        (**self).delete_field(key, field).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set_expiry(key, ttl).await
    }
}
