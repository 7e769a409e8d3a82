//! Redis-backed bucket store.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{BucketStore, StoreError};

/// A [`BucketStore`] over Redis hashes.
///
/// Each rate limit key maps to one Redis hash (`HINCRBY`, `HGETALL`, `HDEL`)
/// whose expiry is managed with `PEXPIRE`. Redis executes each command
/// atomically, which is all the limiter needs. The connection manager
/// reconnects on its own after the server goes away.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: Option<String>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!("Connecting to Redis");
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis connection established");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key_prefix: None,
        }
    }

    /// Namespace every key with `prefix` (joined with `:`).
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.key_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Check the server is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis ping succeeded");
        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(self.key_prefix.as_deref(), key)
    }
}

fn prefixed_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, key),
        None => key.to_string(),
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.hincr(self.full_key(key), field, delta).await?;
        Ok(value)
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.full_key(key)).await?;
        Ok(fields)
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.hdel(self.full_key(key), field).await?;
        Ok(())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let millis = i64::try_from(ttl.as_millis())
            .map_err(|_| StoreError::Protocol(format!("ttl out of range: {:?}", ttl)))?;
        let mut conn = self.conn.clone();
        let _: bool = conn.pexpire(self.full_key(key), millis).await?;
        Ok(())
    }
}
