//! Swirl - Distributed Sliding Window Rate Limiting
//!
//! This crate implements a sliding-window-counter rate limiter. Usage for each
//! key is kept as a handful of coarse time buckets inside a single hash entry
//! of an external key/value store (Redis or anything offering the same hash
//! operations), so many processes can share one quota without storing an
//! entry per request.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{Result, SwirlError};
pub use ratelimit::{Decision, Limiter, LimiterConfig, RateLimitExceeded, Status};
pub use store::{BucketStore, MemoryStore, StoreError};
