//! Error types for Swirl.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Swirl operations.
#[derive(Error, Debug)]
pub enum SwirlError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The rate limit key was empty
    #[error("Rate limit key must not be empty")]
    InvalidKey,

    /// The increment amount was zero or negative
    #[error("Increment amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// Bucket store errors, passed through untouched
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Swirl operations.
pub type Result<T> = std::result::Result<T, SwirlError>;
