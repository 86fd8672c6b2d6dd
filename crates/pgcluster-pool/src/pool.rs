//! Connection pool implementation.
//!
//! Idle connections sit in a lock-free free list. `size` counts every
//! connection that has been created and not yet destroyed, including connects
//! still in flight. It only moves through [`SizeGuard`]s: each connection
//! carries its guard from the connect attempt until it is destroyed, so it is
//! decremented exactly once no matter which path destroys the connection.
//! A destroyed connection gives its capacity back immediately; closing the
//! session happens in the background.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use futures_util::future::join_all;
use pgcluster_client::{
    CommandControl, Connection, ConnectionSettings, Connector, Dsn, OptionalCommandControl,
    TransactionOptions,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PoolSettings;
use crate::error::PoolError;
use crate::rcu;
use crate::recent::RecentCounter;
use crate::size_guard::SizeGuard;
use crate::statistics::{InstanceStatistics, PoolMetrics, PoolStatus};
use crate::transaction::{NonTransaction, Transaction};

/// A bounded pool of connections to one endpoint.
///
/// The pool grows on demand: an acquire that finds the free list empty
/// starts one background connect (if under `max_size`) and waits for any
/// connection to be pushed, whichever comes first.
///
/// # Example
///
/// ```rust,ignore
/// use pgcluster_pool::{Pool, PoolSettings};
/// use tokio::time::{Duration, Instant};
///
/// let pool = Pool::builder(dsn, connector)
///     .settings(PoolSettings::new().initial_size(2).max_size(20))
///     .build()
///     .await?;
///
/// let mut trx = pool
///     .begin(&TransactionOptions::new(), Instant::now() + Duration::from_secs(1), None)
///     .await?;
/// trx.execute("UPDATE orders SET state = 'paid' WHERE id = 42").await?;
/// trx.commit().await?;
/// ```
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    dsn: Dsn,
    masked_dsn: String,
    connector: Arc<dyn Connector>,
    connection_settings: ConnectionSettings,
    max_size: AtomicUsize,
    max_queue_size: AtomicUsize,
    free: SegQueue<Slot>,
    size: Arc<AtomicUsize>,
    wait_count: Arc<AtomicUsize>,
    conn_available: Notify,
    default_cmd_ctl: rcu::Variable<CommandControl>,
    recent_conn_errors: RecentCounter,
    stats: InstanceStatistics,
    closed: AtomicBool,
    shutdown: CancellationToken,
    created_at: Instant,
}

/// A connection together with its share of `size`.
struct Slot {
    conn: Box<dyn Connection>,
    size: SizeGuard,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder(dsn: Dsn, connector: Arc<dyn Connector>) -> PoolBuilder {
        PoolBuilder::new(dsn, connector)
    }

    /// Create a pool and open its initial connections.
    pub async fn create(
        dsn: Dsn,
        connector: Arc<dyn Connector>,
        settings: PoolSettings,
        default_cmd_ctl: CommandControl,
    ) -> Result<Self, PoolError> {
        Self::builder(dsn, connector)
            .settings(settings)
            .default_command_control(default_cmd_ctl)
            .build()
            .await
    }

    async fn init(&self, initial_size: usize) {
        let connects: Vec<JoinHandle<bool>> = (0..initial_size)
            .filter_map(|_| self.inner.spawn_connect())
            .collect();
        let opened = join_all(connects)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        if opened < initial_size {
            tracing::warn!(
                dsn = %self.inner.masked_dsn,
                opened,
                initial_size,
                "could not open all initial connections"
            );
        }

        tracing::info!(
            dsn = %self.inner.masked_dsn,
            opened,
            max = self.inner.max_size.load(Ordering::Relaxed),
            "connection pool created"
        );
    }

    /// Get a connection, waiting until `deadline` at most.
    ///
    /// Fails immediately with [`PoolError::Timeout`] when the deadline has
    /// already passed, and with [`PoolError::QueueOverflow`] when too many
    /// callers are waiting.
    pub async fn acquire(&self, deadline: Instant) -> Result<PooledConnection, PoolError> {
        let slot = self.inner.pop(deadline).await?;
        InstanceStatistics::incr(&self.inner.stats.checkouts_successful);
        InstanceStatistics::incr(&self.inner.stats.busy);
        tracing::trace!(connection_id = slot.conn.id(), "connection acquired");
        Ok(PooledConnection::new(slot, Arc::clone(&self.inner)))
    }

    /// Return a connection. Same as dropping it.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Acquire a connection and start a transaction on it.
    ///
    /// Command control resolves as `override_cc`, then
    /// `options.command_control`, then the pool default. If `BEGIN` fails the
    /// connection is discarded and the error returned; nothing is retried.
    pub async fn begin(
        &self,
        options: &TransactionOptions,
        deadline: Instant,
        override_cc: OptionalCommandControl,
    ) -> Result<Transaction, PoolError> {
        let conn = self.acquire(deadline).await?;
        let cc = override_cc
            .or(options.command_control)
            .unwrap_or_else(|| self.inner.default_cmd_ctl.read_copy());
        Transaction::begin(conn, *options, cc).await
    }

    /// Acquire a connection for statements outside a transaction.
    pub async fn start(&self, deadline: Instant) -> Result<NonTransaction, PoolError> {
        let conn = self.acquire(deadline).await?;
        Ok(NonTransaction::new(conn, self.inner.default_cmd_ctl.read_copy()))
    }

    /// Replace the default command control.
    ///
    /// Applies to transactions started after this call; running transactions
    /// keep the value they resolved. An invalid value is rejected and the
    /// current default stays in place.
    pub fn set_default_command_control(&self, cc: CommandControl) -> Result<(), PoolError> {
        cc.validate()
            .map_err(|e| PoolError::Configuration(e.to_string()))?;
        let previous = self.inner.default_cmd_ctl.exchange(cc);
        if *previous != cc {
            tracing::info!(
                dsn = %self.inner.masked_dsn,
                statement_timeout = ?cc.statement_timeout,
                connect_timeout = ?cc.connect_timeout,
                "default command control updated"
            );
        }
        Ok(())
    }

    /// Current default command control.
    #[must_use]
    pub fn default_command_control(&self) -> CommandControl {
        self.inner.default_cmd_ctl.read_copy()
    }

    /// Change the size limits of a running pool.
    ///
    /// Lowering `max_size` does not close busy connections; releases destroy
    /// connections until `size` fits again. `initial_size` is ignored.
    pub fn set_settings(&self, settings: PoolSettings) -> Result<(), PoolError> {
        settings.validate()?;
        let old_max = self
            .inner
            .max_size
            .swap(settings.max_size, Ordering::AcqRel);
        self.inner
            .max_queue_size
            .store(settings.max_queue_size, Ordering::Release);

        if old_max != settings.max_size {
            tracing::info!(
                dsn = %self.inner.masked_dsn,
                old_max,
                new_max = settings.max_size,
                "pool resized"
            );
        }
        Ok(())
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics::collect(
            &self.inner.stats,
            self.inner.status(),
            self.inner.recent_conn_errors.get(),
            self.inner.created_at.elapsed(),
        )
    }

    /// Failed connection attempts within the recent window.
    #[must_use]
    pub fn recent_connection_errors(&self) -> u64 {
        self.inner.recent_conn_errors.get()
    }

    /// The endpoint this pool connects to.
    #[must_use]
    pub fn dsn(&self) -> &Dsn {
        &self.inner.dsn
    }

    /// Close the pool: stop background connects, fail waiters and close every
    /// idle connection. Busy connections are closed when released.
    pub async fn close(&self) {
        let Some(idle) = self.inner.shut_down() else {
            return;
        };
        join_all(idle.into_iter().map(|Slot { conn, size }| async move {
            conn.close().await;
            drop(size);
        }))
        .await;
        tracing::info!(dsn = %self.inner.masked_dsn, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(idle) = self.inner.shut_down() {
            for slot in idle {
                self.inner.destroy(slot, "pool dropped");
            }
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("dsn", &self.inner.masked_dsn)
            .field("status", &self.inner.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    fn status(&self) -> PoolStatus {
        PoolStatus {
            available: self.free.len(),
            in_use: usize::try_from(self.stats.busy.load(Ordering::Relaxed)).unwrap_or(usize::MAX),
            total: self.size.load(Ordering::Acquire),
            max: self.max_size.load(Ordering::Acquire),
            waiting: self.wait_count.load(Ordering::Acquire),
        }
    }

    fn timeout_error(&self) -> PoolError {
        PoolError::Timeout {
            dsn: self.masked_dsn.clone(),
            waiting: self.wait_count.load(Ordering::Acquire),
        }
    }

    async fn pop(self: &Arc<Self>, deadline: Instant) -> Result<Slot, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }
        if Instant::now() >= deadline {
            InstanceStatistics::incr(&self.stats.pool_exhaust_errors);
            return Err(self.timeout_error());
        }
        if let Some(slot) = self.try_pop() {
            return Ok(slot);
        }

        let waiter = SizeGuard::new(Arc::clone(&self.wait_count));
        let max_queue_size = self.max_queue_size.load(Ordering::Acquire);
        if waiter.value() > max_queue_size {
            InstanceStatistics::incr(&self.stats.queue_size_errors);
            return Err(PoolError::QueueOverflow {
                dsn: self.masked_dsn.clone(),
                max_queue_size,
            });
        }

        if self.spawn_connect().is_none() {
            tracing::trace!(dsn = %self.masked_dsn, "pool at capacity, waiting for a release");
        }

        loop {
            let notified = self.conn_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(slot) = self.try_pop() {
                return Ok(slot);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::PoolClosed);
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => {
                    if let Some(slot) = self.try_pop() {
                        return Ok(slot);
                    }
                    InstanceStatistics::incr(&self.stats.pool_exhaust_errors);
                    tracing::debug!(
                        dsn = %self.masked_dsn,
                        waiting = self.wait_count.load(Ordering::Relaxed),
                        "no connection available before deadline"
                    );
                    return Err(self.timeout_error());
                }
            }
        }
    }

    fn try_pop(&self) -> Option<Slot> {
        while let Some(slot) = self.free.pop() {
            if slot.conn.is_broken() {
                self.destroy(slot, "broken while idle");
                continue;
            }
            return Some(slot);
        }
        None
    }

    /// Put a connection on the free list. Once the pool is closed whatever
    /// lands there is destroyed, including slots pushed while `shut_down`
    /// was draining.
    fn push(&self, slot: Slot) {
        self.free.push(slot);
        if self.closed.load(Ordering::SeqCst) {
            while let Some(slot) = self.free.pop() {
                self.destroy(slot, "pool closed");
            }
            return;
        }
        self.conn_available.notify_one();
    }

    /// Start a background connect if the pool has room. The returned handle
    /// may be dropped to detach the task.
    fn spawn_connect(self: &Arc<Self>) -> Option<JoinHandle<bool>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let guard = SizeGuard::try_new(
            Arc::clone(&self.size),
            self.max_size.load(Ordering::Acquire),
        )?;
        let inner = Arc::clone(self);
        Some(tokio::spawn(async move {
            let shutdown = inner.shutdown.clone();
            tokio::select! {
                () = shutdown.cancelled() => false,
                opened = inner.connect(guard) => opened,
            }
        }))
    }

    async fn connect(&self, guard: SizeGuard) -> bool {
        let cc = self.default_cmd_ctl.read();
        let started = Instant::now();
        let result = tokio::time::timeout(
            cc.connect_timeout,
            self.connector
                .connect(&self.dsn, &self.connection_settings, &cc),
        )
        .await
        .unwrap_or_else(|_| Err(pgcluster_client::Error::ConnectTimeout(cc.connect_timeout)));

        match result {
            Ok(conn) => {
                InstanceStatistics::incr(&self.stats.connections_opened);
                tracing::debug!(
                    dsn = %self.masked_dsn,
                    connection_id = conn.id(),
                    elapsed = ?started.elapsed(),
                    size = guard.value(),
                    "connection opened"
                );
                self.push(Slot { conn, size: guard });
                true
            }
            Err(error) => {
                InstanceStatistics::incr(&self.stats.connection_errors);
                self.recent_conn_errors.add(1);
                tracing::warn!(
                    dsn = %self.masked_dsn,
                    error = %error,
                    "failed to open connection"
                );
                false
            }
        }
    }

    fn release(self: &Arc<Self>, mut slot: Slot, broken: bool) {
        InstanceStatistics::decr(&self.stats.busy);
        let stats = slot.conn.take_statistics();
        self.stats.account(&stats);

        if broken || slot.conn.is_broken() {
            self.destroy(slot, "broken");
            self.replace_for_waiters();
        } else if !slot.conn.is_idle() {
            self.destroy(slot, "released inside a transaction");
            self.replace_for_waiters();
        } else if self.size.load(Ordering::Acquire) > self.max_size.load(Ordering::Acquire) {
            self.destroy(slot, "pool shrinking");
        } else {
            self.push(slot);
        }
    }

    /// A destroyed connection would have served a waiter; open another one.
    fn replace_for_waiters(self: &Arc<Self>) {
        if self.wait_count.load(Ordering::Acquire) > 0 && self.spawn_connect().is_some() {
            tracing::debug!(dsn = %self.masked_dsn, "replacing discarded connection for waiters");
        }
    }

    fn destroy(&self, slot: Slot, reason: &'static str) {
        InstanceStatistics::incr(&self.stats.connections_dropped);
        tracing::debug!(
            dsn = %self.masked_dsn,
            connection_id = slot.conn.id(),
            reason,
            "dropping connection"
        );

        let Slot { conn, size } = slot;
        drop(size);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(conn.close());
            }
            Err(_) => drop(conn),
        }
    }

    /// Mark the pool closed and hand back the idle connections. `None` if it
    /// was already closed.
    fn shut_down(&self) -> Option<Vec<Slot>> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.shutdown.cancel();
        self.conn_available.notify_waiters();

        let mut idle = Vec::with_capacity(self.free.len());
        while let Some(slot) = self.free.pop() {
            InstanceStatistics::incr(&self.stats.connections_dropped);
            idle.push(slot);
        }
        Some(idle)
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(dsn, connector)
///     .max_size(20)
///     .default_command_control(cc)
///     .build()
///     .await?;
/// ```
pub struct PoolBuilder {
    dsn: Dsn,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    default_cmd_ctl: CommandControl,
    connection_settings: ConnectionSettings,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new(dsn: Dsn, connector: Arc<dyn Connector>) -> Self {
        Self {
            dsn,
            connector,
            settings: PoolSettings::default(),
            default_cmd_ctl: CommandControl::default(),
            connection_settings: ConnectionSettings::default(),
        }
    }

    /// Set the pool settings.
    #[must_use]
    pub fn settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the number of connections opened at startup.
    #[must_use]
    pub fn initial_size(mut self, count: usize) -> Self {
        self.settings.initial_size = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, count: usize) -> Self {
        self.settings.max_size = count;
        self
    }

    /// Set the wait queue limit.
    #[must_use]
    pub fn max_queue_size(mut self, count: usize) -> Self {
        self.settings.max_queue_size = count;
        self
    }

    /// Set the default command control.
    #[must_use]
    pub fn default_command_control(mut self, cc: CommandControl) -> Self {
        self.default_cmd_ctl = cc;
        self
    }

    /// Set the settings passed to the connector.
    #[must_use]
    pub fn connection_settings(mut self, settings: ConnectionSettings) -> Self {
        self.connection_settings = settings;
        self
    }

    /// Build the pool and open `initial_size` connections.
    pub async fn build(self) -> Result<Pool, PoolError> {
        self.settings.validate()?;
        self.default_cmd_ctl
            .validate()
            .map_err(|e| PoolError::Configuration(e.to_string()))?;

        let masked_dsn = self.dsn.masked();
        let inner = Arc::new(PoolInner {
            dsn: self.dsn,
            masked_dsn,
            connector: self.connector,
            connection_settings: self.connection_settings,
            max_size: AtomicUsize::new(self.settings.max_size),
            max_queue_size: AtomicUsize::new(self.settings.max_queue_size),
            free: SegQueue::new(),
            size: Arc::new(AtomicUsize::new(0)),
            wait_count: Arc::new(AtomicUsize::new(0)),
            conn_available: Notify::new(),
            default_cmd_ctl: rcu::Variable::new(self.default_cmd_ctl),
            recent_conn_errors: RecentCounter::new(self.settings.recent_errors_window),
            stats: InstanceStatistics::default(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            created_at: Instant::now(),
        });

        let pool = Pool { inner };
        pool.init(self.settings.initial_size).await;
        Ok(pool)
    }
}

/// A connection retrieved from the pool.
///
/// Dereferences to the underlying [`Connection`]. When dropped, the
/// connection goes back to the pool, or is destroyed if it is broken.
/// Use [`detach()`](PooledConnection::detach) to take it out of the pool.
pub struct PooledConnection {
    slot: Option<Slot>,
    pool: Arc<PoolInner>,
    broken: bool,
    acquired_at: Instant,
}

impl PooledConnection {
    fn new(slot: Slot, pool: Arc<PoolInner>) -> Self {
        Self {
            slot: Some(slot),
            pool,
            broken: false,
            acquired_at: Instant::now(),
        }
    }

    /// Make the release destroy this connection instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether [`mark_broken`](Self::mark_broken) was called.
    #[must_use]
    pub fn is_marked_broken(&self) -> bool {
        self.broken
    }

    /// Time since the connection was acquired.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Detach the connection from the pool.
    ///
    /// The connection no longer counts towards the pool size and will not be
    /// returned when dropped. This is useful when you want to keep the
    /// connection beyond the normal pool lifecycle.
    pub fn detach(mut self) -> Option<Box<dyn Connection>> {
        let Slot { conn, size } = self.slot.take()?;
        InstanceStatistics::decr(&self.pool.stats.busy);
        InstanceStatistics::incr(&self.pool.stats.connections_dropped);
        drop(size);
        Some(conn)
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match &self.slot {
            Some(slot) => slot.conn.as_ref(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.slot {
            Some(slot) => slot.conn.as_mut(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::trace!(
                connection_id = slot.conn.id(),
                held_for = ?self.acquired_at.elapsed(),
                "returning connection to pool"
            );
            self.pool.release(slot, self.broken);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.slot.as_ref().map(|s| &s.conn))
            .field("broken", &self.broken)
            .finish()
    }
}
