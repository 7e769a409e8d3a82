//! Rate limiting logic.

mod bucket;
mod clock;
mod limiter;
mod status;

pub use bucket::BucketTimestamp;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Limiter, LimiterConfig};
pub use status::{Decision, RateLimitExceeded, Status};
