//! Per-connection statistics.

use std::time::Duration;

/// Counters a connection accumulates between two releases to its pool.
///
/// The pool drains them with [`Connection::take_statistics`] on every release
/// and folds them into its instance statistics.
///
/// [`Connection::take_statistics`]: crate::Connection::take_statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatistics {
    /// Transactions started.
    pub trx_total: u64,
    /// Transactions committed.
    pub commit_total: u64,
    /// Transactions rolled back.
    pub rollback_total: u64,
    /// Statements sent outside of transaction control commands.
    pub execute_total: u64,
    /// Statements that failed.
    pub error_execute_total: u64,
    /// Statements that hit their timeout.
    pub execute_timeout: u64,
    /// Time spent executing statements.
    pub execute_time: Duration,
}

impl ConnectionStatistics {
    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
