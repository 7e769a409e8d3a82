//! In-process bucket store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::{BucketStore, StoreError};
use crate::ratelimit::{Clock, SystemClock};

/// One hash entry: its fields plus an optional expiry.
#[derive(Debug, Default)]
struct HashEntry {
    fields: HashMap<String, i64>,
    expires_at: Option<DateTime<Utc>>,
}

impl HashEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A [`BucketStore`] kept in process memory.
///
/// Behaves like a Redis hash: increments are atomic per entry, deleting the
/// last field removes the entry, and expiry only applies to keys that exist.
/// Expired entries are dropped when next touched.
pub struct MemoryStore {
    entries: DashMap<String, HashEntry>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store using the system clock for expiry.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create an empty store that evaluates expiry against `clock`.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            entries: DashMap::new(),
            clock: Arc::new(clock),
        }
    }

    /// Number of live fields under `key`.
    pub fn field_count(&self, key: &str) -> usize {
        self.purge_if_expired(key);
        self.entries.get(key).map(|e| e.fields.len()).unwrap_or(0)
    }

    /// Time left before `key` expires, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_if_expired(key);
        let now = self.clock.now();
        self.entries
            .get(key)
            .and_then(|e| e.expires_at)
            .and_then(|at| (at - now).to_std().ok())
    }

    /// Number of stored keys, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn purge_if_expired(&self, key: &str) {
        let now = self.clock.now();
        if self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            trace!(key = %key, "Dropped expired entry");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.is_expired(now) {
            *entry = HashEntry::default();
        }

        let current = entry.fields.get(field).copied().unwrap_or(0);
        let value = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Protocol("increment would overflow".to_string()))?;
        entry.fields.insert(field.to_string(), value);
        Ok(value)
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.purge_if_expired(key);
        Ok(self
            .entries
            .get(key)
            .map(|e| {
                e.fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.purge_if_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.fields.remove(field);
        }
        self.entries.remove_if(key, |_, e| e.fields.is_empty());
        Ok(())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.purge_if_expired(key);
        if ttl.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Protocol(format!("invalid ttl: {}", e)))?;
        let now = self.clock.now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = now.checked_add_signed(ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use chrono::TimeZone;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    #[tokio::test]
    async fn test_increment_creates_and_accumulates() {
        let store = MemoryStore::new();

        assert_eq!(store.increment_field("k", "100", 2).await.unwrap(), 2);
        assert_eq!(store.increment_field("k", "100", 3).await.unwrap(), 5);
        assert_eq!(store.increment_field("k", "160", 1).await.unwrap(), 1);

        let fields = store.get_all_fields("k").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["100"], "5");
        assert_eq!(fields["160"], "1");
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let store = MemoryStore::new();
        assert!(store.get_all_fields("nope").await.unwrap().is_empty());
        store.delete_field("nope", "1").await.unwrap();
        store.set_expiry("nope", Duration::from_secs(5)).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_deleting_last_field_removes_key() {
        let store = MemoryStore::new();
        store.increment_field("k", "1", 1).await.unwrap();
        store.increment_field("k", "2", 1).await.unwrap();

        store.delete_field("k", "1").await.unwrap();
        assert_eq!(store.field_count("k"), 1);
        assert_eq!(store.len(), 1);

        store.delete_field("k", "2").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expiry() {
        let clock = clock();
        let store = MemoryStore::with_clock(clock.clone());
        store.increment_field("k", "1", 4).await.unwrap();
        store.set_expiry("k", Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(4));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(6)));
        assert_eq!(store.field_count("k"), 1);

        clock.advance(Duration::from_secs(6));
        assert_eq!(store.ttl("k"), None);
        assert!(store.get_all_fields("k").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_increment_after_expiry_starts_fresh() {
        let clock = clock();
        let store = MemoryStore::with_clock(clock.clone());
        store.increment_field("k", "1", 4).await.unwrap();
        store.set_expiry("k", Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.increment_field("k", "1", 1).await.unwrap(), 1);
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_deletes() {
        let store = MemoryStore::new();
        store.increment_field("k", "1", 1).await.unwrap();
        store.set_expiry("k", Duration::ZERO).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_is_an_error() {
        let store = MemoryStore::new();
        store.increment_field("k", "1", i64::MAX).await.unwrap();
        let result = store.increment_field("k", "1", 1).await;
        assert!(matches!(result, Err(StoreError::Protocol(_))));

        let fields = store.get_all_fields("k").await.unwrap();
        assert_eq!(fields["1"], i64::MAX.to_string());
    }

    #[tokio::test]
    async fn test_failed_increment_leaves_entry_untouched() {
        let store = MemoryStore::new();
        store.increment_field("k", "1", 7).await.unwrap();
        store.increment_field("k", "2", i64::MIN).await.unwrap();

        let result = store.increment_field("k", "2", -1).await;
        assert!(matches!(result, Err(StoreError::Protocol(_))));

        let fields = store.get_all_fields("k").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["1"], "7");
        assert_eq!(fields["2"], i64::MIN.to_string());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment_field("k", "1", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let fields = store.get_all_fields("k").await.unwrap();
        assert_eq!(fields["1"], "800");
    }
}
