//! Core sliding window counter rate limiter.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, instrument, trace, warn};

use super::bucket::BucketTimestamp;
use super::clock::{Clock, SystemClock};
use super::status::{Decision, Status};
use crate::error::{Result, SwirlError};
use crate::store::BucketStore;

/// Default rate limit when no specific limit is configured.
const DEFAULT_LIMIT: u64 = 1000;
/// Default rolling period.
const DEFAULT_PERIOD: Duration = Duration::from_secs(3600);
/// Default bucket width, 1/60 of the default period.
const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(60);

/// Configuration for a limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum total increments allowed within one rolling period
    pub limit: u64,
    /// Length of the rolling window
    pub period: Duration,
    /// Granularity of the stored counters, typically `period / 60`
    pub bucket_width: Duration,
}

impl LimiterConfig {
    /// Create a new limiter configuration.
    pub fn new(limit: u64, period: Duration, bucket_width: Duration) -> Self {
        Self {
            limit,
            period,
            bucket_width,
        }
    }

    /// Check the configuration is usable.
    ///
    /// Buckets are named by whole Unix seconds, so `period` and
    /// `bucket_width` must both be whole seconds. Their ratio is left to the
    /// caller, as long as a bucket is no wider than the period.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(SwirlError::Config("limit must be positive".to_string()));
        }
        if i64::try_from(self.limit).is_err() {
            return Err(SwirlError::Config(format!(
                "limit must not exceed {}",
                i64::MAX
            )));
        }
        if self.period.is_zero() {
            return Err(SwirlError::Config("period must be positive".to_string()));
        }
        if self.bucket_width.is_zero() {
            return Err(SwirlError::Config(
                "bucket width must be positive".to_string(),
            ));
        }
        if self.period.subsec_nanos() != 0 {
            return Err(SwirlError::Config(format!(
                "period {:?} must be a whole number of seconds",
                self.period
            )));
        }
        if self.bucket_width.subsec_nanos() != 0 {
            return Err(SwirlError::Config(format!(
                "bucket width {:?} must be a whole number of seconds",
                self.bucket_width
            )));
        }
        if self.bucket_width > self.period {
            return Err(SwirlError::Config(format!(
                "bucket width {:?} is larger than period {:?}",
                self.bucket_width, self.period
            )));
        }
        Ok(())
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            period: DEFAULT_PERIOD,
            bucket_width: DEFAULT_BUCKET_WIDTH,
        }
    }
}

/// Sliding window counter rate limiter.
///
/// Usage for a key is kept as one counter per `bucket_width` slice of time,
/// all stored as fields of a single store entry. Each call bumps the current
/// bucket, then sums the buckets younger than `period` and prunes the rest.
///
/// The limiter itself only holds immutable configuration, so a single
/// instance can be shared freely across tasks. Correctness under concurrency
/// rests on the store's `increment_field` being atomic; a bucket landing
/// between the snapshot read and the prune is an accepted approximation.
/// Expired buckets are only ever removed by a call that scans them.
pub struct Limiter<S, C = SystemClock> {
    store: S,
    clock: C,
    config: LimiterConfig,
    limit: i64,
    period: chrono::Duration,
}

impl<S, C> std::fmt::Debug for Limiter<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("config", &self.config)
            .finish()
    }
}

impl<S: BucketStore> Limiter<S> {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: S, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<S: BucketStore, C: Clock> Limiter<S, C> {
    /// Create a limiter reading time from `clock`.
    pub fn with_clock(store: S, config: LimiterConfig, clock: C) -> Result<Self> {
        config.validate()?;

        let limit = i64::try_from(config.limit)
            .map_err(|_| SwirlError::Config("limit out of range".to_string()))?;
        let period = chrono::Duration::from_std(config.period)
            .map_err(|e| SwirlError::Config(format!("period out of range: {}", e)))?;

        Ok(Self {
            store,
            clock,
            config,
            limit,
            period,
        })
    }

    /// The limiter configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The clock the limiter reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record `amount` units of usage for `key` and report whether the key is
    /// now over its limit.
    ///
    /// Any store failure aborts the call; an error means the quota state is
    /// unknown, not that the request is allowed.
    #[instrument(skip(self), fields(limit = self.config.limit))]
    pub async fn increment(&self, key: &str, amount: i64) -> Result<Decision> {
        if key.is_empty() {
            return Err(SwirlError::InvalidKey);
        }
        if amount <= 0 {
            return Err(SwirlError::InvalidAmount(amount));
        }

        let now = self.clock.now();
        let bucket = BucketTimestamp::for_instant(now, self.config.bucket_width);
        let reset_at = now
            .checked_add_signed(self.period)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        trace!(bucket = %bucket, "Incrementing bucket");

        let bucket_count = self
            .store
            .increment_field(key, &bucket.as_field(), amount)
            .await?;

        // A single bucket at the limit can only be over it once the rest are
        // added, so skip the scan.
        if bucket_count >= self.limit {
            debug!(
                bucket = %bucket,
                count = bucket_count,
                "Current bucket alone exceeds the rate limit"
            );
            return Ok(Decision::Exceeded(self.status(0, reset_at)));
        }

        self.store.set_expiry(key, self.config.period).await?;

        let buckets = self.store.get_all_fields(key).await?;
        let threshold = BucketTimestamp::threshold(now, self.period);

        let mut total: i64 = 0;
        let mut stale = Vec::new();
        for (field, value) in &buckets {
            match BucketTimestamp::parse_field(field) {
                Some(timestamp) if timestamp > threshold => {
                    total = total.saturating_add(parse_count(field, value));
                }
                Some(_) => stale.push(field.as_str()),
                None => {
                    warn!(field = %field, "Pruning bucket with malformed timestamp");
                    stale.push(field.as_str());
                }
            }
        }

        if !stale.is_empty() {
            debug!(pruned = stale.len(), threshold = %threshold, "Pruning expired buckets");
            try_join_all(stale.iter().map(|field| self.store.delete_field(key, field))).await?;
        }

        if total >= self.limit {
            debug!(total = total, "Rate limit exceeded");
            return Ok(Decision::Exceeded(self.status(0, reset_at)));
        }

        let remaining = u64::try_from(self.limit - total.max(0)).unwrap_or(0);
        trace!(total = total, remaining = remaining, "Within rate limit");
        Ok(Decision::Allowed(self.status(remaining, reset_at)))
    }

    fn status(&self, remaining: u64, reset_at: DateTime<Utc>) -> Status {
        Status {
            remaining,
            limit: self.config.limit,
            period: self.config.period,
            reset_at,
        }
    }
}

/// Parse a stored bucket count, counting malformed values as zero.
fn parse_count(field: &str, value: &str) -> i64 {
    value.parse().unwrap_or_else(|_| {
        warn!(field = %field, value = %value, "Ignoring malformed bucket count");
        0
    })
}
