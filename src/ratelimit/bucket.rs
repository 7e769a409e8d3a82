//! Bucket timestamps.
//!
//! Each bucket is a field inside the key's hash entry, named by the Unix
//! second at which the bucket starts. Field names are only ever compared as
//! integers: comparing the decimal strings breaks as soon as two timestamps
//! have different digit counts.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Start of a bucket, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketTimestamp(i64);

impl BucketTimestamp {
    /// Wrap a raw Unix-second value.
    pub fn from_unix(secs: i64) -> Self {
        Self(secs)
    }

    /// The bucket containing `now`, with boundaries aligned to the Unix epoch.
    ///
    /// `width` is taken in whole seconds; the limiter rejects anything finer.
    pub fn for_instant(now: DateTime<Utc>, width: Duration) -> Self {
        let width = i64::try_from(width.as_secs()).unwrap_or(i64::MAX).max(1);
        Self(now.timestamp().div_euclid(width) * width)
    }

    /// Oldest timestamp a bucket may *not* have and still count: buckets must
    /// be strictly newer than `now - period`.
    pub fn threshold(now: DateTime<Utc>, period: chrono::Duration) -> Self {
        let start = now
            .checked_sub_signed(period)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self(start.timestamp())
    }

    /// Parse a field name written by [`as_field`](Self::as_field).
    pub fn parse_field(field: &str) -> Option<Self> {
        field.parse().ok().map(Self)
    }

    /// The field name for this bucket.
    pub fn as_field(&self) -> String {
        self.0.to_string()
    }

    /// Unix seconds.
    pub fn unix(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BucketTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
