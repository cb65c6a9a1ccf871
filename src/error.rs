//! Error types for quotapool.

use thiserror::Error;

/// Main error type for quotapool operations.
#[derive(Error, Debug)]
pub enum QuotaPoolError {
    /// Invalid limiter or pool parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// No limiter registered under the requested key
    #[error("Limiter not found: {0}")]
    LimiterNotFound(String),

    /// Redis communication errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Errors from non-Redis quota stores
    #[error("Store error: {0}")]
    Store(String),

    /// The task's context ended before it was admitted
    #[error("task expired")]
    TaskExpired,

    /// Caller-supplied work panicked
    #[error("panic: {0}")]
    Panicked(String),

    /// The worker pool queue is full and the pool does not block
    #[error("worker pool is saturated")]
    PoolSaturated,

    /// The worker pool has been released
    #[error("worker pool is closed")]
    PoolClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuotaPoolError {
    /// Whether this error reports a task whose context ended before admission.
    pub fn is_expired(&self) -> bool {
        matches!(self, QuotaPoolError::TaskExpired)
    }
}

/// Result type alias for quotapool operations.
pub type Result<T> = std::result::Result<T, QuotaPoolError>;
