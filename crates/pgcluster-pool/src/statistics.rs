//! Pool statistics.
//!
//! [`InstanceStatistics`] is the live, lock-free aggregate a pool updates on
//! its hot paths. [`PoolMetrics`] and [`PoolStatus`] are plain snapshots of it
//! for export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pgcluster_client::ConnectionStatistics;

/// Metric names under which a pool's values are exported.
pub mod metric_names {
    /// Counter: connections opened.
    pub const CONNECTIONS_OPENED: &str = "connections.opened";
    /// Counter: connections destroyed.
    pub const CONNECTIONS_DROPPED: &str = "connections.dropped";
    /// Counter: failed connection attempts.
    pub const CONNECTIONS_ERRORS: &str = "connections.errors";
    /// Gauge: failed connection attempts within the recent window.
    pub const CONNECTIONS_RECENT_ERRORS: &str = "connections.recent-errors";
    /// Gauge: connections created and not yet destroyed.
    pub const CONNECTIONS_ACTIVE: &str = "connections.active";
    /// Gauge: connections handed out to callers.
    pub const CONNECTIONS_BUSY: &str = "connections.busy";
    /// Gauge: connection cap.
    pub const CONNECTIONS_MAX: &str = "connections.max";
    /// Gauge: callers waiting for a connection.
    pub const CONNECTIONS_WAITING: &str = "connections.waiting";
    /// Counter: acquires that timed out.
    pub const POOL_EXHAUST_ERRORS: &str = "pool.exhaust-errors";
    /// Counter: acquires rejected by the wait queue limit.
    pub const POOL_QUEUE_ERRORS: &str = "pool.queue-size-errors";
    /// Counter: transactions started.
    pub const TRANSACTIONS_TOTAL: &str = "transactions.total";
    /// Counter: transactions committed.
    pub const TRANSACTIONS_COMMITTED: &str = "transactions.committed";
    /// Counter: transactions rolled back.
    pub const TRANSACTIONS_ROLLED_BACK: &str = "transactions.rolled-back";
    /// Counter: statements executed.
    pub const QUERIES_TOTAL: &str = "queries.total";
    /// Counter: statements that failed.
    pub const QUERIES_ERRORS: &str = "queries.errors";
    /// Counter: statements that timed out.
    pub const QUERIES_TIMEOUTS: &str = "queries.timeouts";
}

/// Live counters of one pool.
#[derive(Debug, Default)]
pub struct InstanceStatistics {
    pub(crate) connections_opened: AtomicU64,
    pub(crate) connections_dropped: AtomicU64,
    pub(crate) connection_errors: AtomicU64,
    pub(crate) checkouts_successful: AtomicU64,
    pub(crate) busy: AtomicU64,
    pub(crate) pool_exhaust_errors: AtomicU64,
    pub(crate) queue_size_errors: AtomicU64,
    pub(crate) trx_total: AtomicU64,
    pub(crate) commit_total: AtomicU64,
    pub(crate) rollback_total: AtomicU64,
    pub(crate) execute_total: AtomicU64,
    pub(crate) error_execute_total: AtomicU64,
    pub(crate) execute_timeout: AtomicU64,
    pub(crate) execute_time_us: AtomicU64,
}

impl InstanceStatistics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    /// Fold a connection's drained counters into the aggregate.
    pub(crate) fn account(&self, stats: &ConnectionStatistics) {
        if stats.is_empty() {
            return;
        }
        self.trx_total.fetch_add(stats.trx_total, Ordering::Relaxed);
        self.commit_total.fetch_add(stats.commit_total, Ordering::Relaxed);
        self.rollback_total.fetch_add(stats.rollback_total, Ordering::Relaxed);
        self.execute_total.fetch_add(stats.execute_total, Ordering::Relaxed);
        self.error_execute_total
            .fetch_add(stats.error_execute_total, Ordering::Relaxed);
        self.execute_timeout
            .fetch_add(stats.execute_timeout, Ordering::Relaxed);
        let micros = u64::try_from(stats.execute_time.as_micros()).unwrap_or(u64::MAX);
        self.execute_time_us.fetch_add(micros, Ordering::Relaxed);
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle connections in the free list.
    pub available: usize,
    /// Connections currently handed out.
    pub in_use: usize,
    /// Connections created and not yet destroyed, including in-flight connects.
    pub total: usize,
    /// Maximum allowed connections.
    pub max: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Current sizes.
    pub status: PoolStatus,
    /// Connections opened since pool start.
    pub connections_opened: u64,
    /// Connections destroyed since pool start.
    pub connections_dropped: u64,
    /// Failed connection attempts since pool start.
    pub connection_errors: u64,
    /// Failed connection attempts within the recent window.
    pub recent_connection_errors: u64,
    /// Successful acquires.
    pub checkouts_successful: u64,
    /// Acquires that hit their deadline.
    pub pool_exhaust_errors: u64,
    /// Acquires rejected because the wait queue was full.
    pub queue_size_errors: u64,
    /// Transactions started.
    pub trx_total: u64,
    /// Transactions committed.
    pub commit_total: u64,
    /// Transactions rolled back.
    pub rollback_total: u64,
    /// Statements executed.
    pub execute_total: u64,
    /// Statements that failed.
    pub error_execute_total: u64,
    /// Statements that timed out.
    pub execute_timeout: u64,
    /// Time spent executing statements.
    pub execute_time: Duration,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    pub(crate) fn collect(
        stats: &InstanceStatistics,
        status: PoolStatus,
        recent_connection_errors: u64,
        uptime: Duration,
    ) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            status,
            connections_opened: load(&stats.connections_opened),
            connections_dropped: load(&stats.connections_dropped),
            connection_errors: load(&stats.connection_errors),
            recent_connection_errors,
            checkouts_successful: load(&stats.checkouts_successful),
            pool_exhaust_errors: load(&stats.pool_exhaust_errors),
            queue_size_errors: load(&stats.queue_size_errors),
            trx_total: load(&stats.trx_total),
            commit_total: load(&stats.commit_total),
            rollback_total: load(&stats.rollback_total),
            execute_total: load(&stats.execute_total),
            error_execute_total: load(&stats.error_execute_total),
            execute_timeout: load(&stats.execute_timeout),
            execute_time: Duration::from_micros(load(&stats.execute_time_us)),
            uptime,
        }
    }

    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.pool_exhaust_errors + self.queue_size_errors;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate connect success rate (0.0 to 1.0).
    #[must_use]
    pub fn connect_success_rate(&self) -> f64 {
        let attempts = self.connections_opened + self.connection_errors;
        if attempts == 0 {
            return 1.0;
        }
        self.connections_opened as f64 / attempts as f64
    }

    /// Every exported value under its metric name.
    #[must_use]
    pub fn named_values(&self) -> Vec<(&'static str, u64)> {
        use metric_names::*;

        let gauge = |v: usize| u64::try_from(v).unwrap_or(u64::MAX);
        vec![
            (CONNECTIONS_OPENED, self.connections_opened),
            (CONNECTIONS_DROPPED, self.connections_dropped),
            (CONNECTIONS_ERRORS, self.connection_errors),
            (CONNECTIONS_RECENT_ERRORS, self.recent_connection_errors),
            (CONNECTIONS_ACTIVE, gauge(self.status.total)),
            (CONNECTIONS_BUSY, gauge(self.status.in_use)),
            (CONNECTIONS_MAX, gauge(self.status.max)),
            (CONNECTIONS_WAITING, gauge(self.status.waiting)),
            (POOL_EXHAUST_ERRORS, self.pool_exhaust_errors),
            (POOL_QUEUE_ERRORS, self.queue_size_errors),
            (TRANSACTIONS_TOTAL, self.trx_total),
            (TRANSACTIONS_COMMITTED, self.commit_total),
            (TRANSACTIONS_ROLLED_BACK, self.rollback_total),
            (QUERIES_TOTAL, self.execute_total),
            (QUERIES_ERRORS, self.error_execute_total),
            (QUERIES_TIMEOUTS, self.execute_timeout),
        ]
    }
}
