//! Per-call rate limit status and decisions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Quota state for a key as observed by one `increment` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Increments still allowed in the current rolling period
    pub remaining: u64,
    /// Configured limit
    pub limit: u64,
    /// Configured rolling period
    pub period: Duration,
    /// Approximate instant at which the quota is fully restored
    pub reset_at: DateTime<Utc>,
}

impl Status {
    /// Time left until `reset_at`, or zero if it has passed.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate limit of {} per {} has been exceeded and resets at {}",
            self.limit,
            format_period(self.period),
            self.reset_at.to_rfc3339()
        )
    }
}

/// Render a period as e.g. `1h`, `1m30s`, `1s500ms` or `250ms`.
fn format_period(period: Duration) -> String {
    let secs = period.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let millis = period.subsec_millis();

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}

/// Outcome of an `increment` call.
///
/// Going over the limit is an expected result, not an error, so it is a
/// variant here rather than an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Total usage is still under the limit.
    Allowed(Status),
    /// Total usage has reached the limit.
    Exceeded(Status),
}

impl Decision {
    /// Whether the limit has been reached.
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Decision::Exceeded(_))
    }

    /// The status carried by either variant.
    pub fn status(&self) -> &Status {
        match self {
            Decision::Allowed(status) | Decision::Exceeded(status) => status,
        }
    }

    /// Consume the decision, returning its status.
    pub fn into_status(self) -> Status {
        match self {
            Decision::Allowed(status) | Decision::Exceeded(status) => status,
        }
    }

    /// Convert into a `Result` for callers that want to bail with `?`.
    pub fn into_result(self) -> Result<Status, RateLimitExceeded> {
        match self {
            Decision::Allowed(status) => Ok(status),
            Decision::Exceeded(status) => Err(RateLimitExceeded(status)),
        }
    }
}

/// Error form of an exceeded decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RateLimitExceeded(pub Status);

impl RateLimitExceeded {
    /// The status at the time the limit was hit.
    pub fn status(&self) -> &Status {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status(remaining: u64) -> Status {
        Status {
            remaining,
            limit: 10,
            period: Duration::from_secs(3600),
            reset_at: Utc.timestamp_opt(1_700_003_600, 0).unwrap(),
        }
    }

    #[test]
    fn test_status_message() {
        assert_eq!(
            status(0).to_string(),
            "rate limit of 10 per 1h has been exceeded and resets at 2023-11-14T23:13:20+00:00"
        );
    }

    #[test]
    fn test_format_period() {
        assert_eq!(format_period(Duration::from_secs(3)), "3s");
        assert_eq!(format_period(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_period(Duration::from_secs(3660)), "1h1m");
        assert_eq!(format_period(Duration::from_millis(250)), "250ms");
        assert_eq!(format_period(Duration::from_millis(1500)), "1s500ms");
        assert_eq!(format_period(Duration::from_millis(3_600_250)), "1h250ms");
        assert_eq!(format_period(Duration::ZERO), "0s");
    }

    #[test]
    fn test_retry_after() {
        let status = status(0);
        let now = Utc.timestamp_opt(1_700_003_000, 0).unwrap();
        assert_eq!(status.retry_after(now), Duration::from_secs(600));

        let later = Utc.timestamp_opt(1_700_004_000, 0).unwrap();
        assert_eq!(status.retry_after(later), Duration::ZERO);
    }

    #[test]
    fn test_decision_accessors() {
        let allowed = Decision::Allowed(status(4));
        assert!(!allowed.is_exceeded());
        assert_eq!(allowed.status().remaining, 4);
        assert_eq!(allowed.clone().into_result().unwrap().remaining, 4);

        let exceeded = Decision::Exceeded(status(0));
        assert!(exceeded.is_exceeded());
        let err = exceeded.clone().into_result().unwrap_err();
        assert_eq!(err.status(), exceeded.status());
        assert_eq!(err.to_string(), exceeded.into_status().to_string());
    }
}
