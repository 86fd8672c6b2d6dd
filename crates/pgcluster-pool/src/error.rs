//! Pool error types.

use thiserror::Error;

/// Errors returned by pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The deadline passed before a connection became available.
    ///
    /// Recoverable: retry with a new deadline or fail the request.
    #[error("no connection to {dsn} available before deadline ({waiting} waiting)")]
    Timeout {
        /// Masked DSN of the pool.
        dsn: String,
        /// Waiters queued when this one gave up.
        waiting: usize,
    },

    /// Too many callers are already waiting.
    #[error("wait queue for {dsn} is full (max {max_queue_size})")]
    QueueOverflow {
        /// Masked DSN of the pool.
        dsn: String,
        /// Configured wait queue limit.
        max_queue_size: usize,
    },

    /// A connection-level failure while using an acquired connection.
    #[error(transparent)]
    Connection(#[from] pgcluster_client::Error),

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Invalid pool settings.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Whether this is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
