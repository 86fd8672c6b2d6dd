//! Host selection on top of the topology.
//!
//! [`Cluster`] owns one [`Pool`] per host plus the topology tracker, and
//! picks a pool for each request from the latest published snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::join_all;
use pgcluster_client::{
    CommandControl, ConnectionSettings, Connector, Dsn, OptionalCommandControl,
    TransactionOptions, split_by_host,
};
use pgcluster_pool::{NonTransaction, Pool, PoolError, PoolMetrics, PoolSettings, Transaction};
use tokio::time::Instant;

use crate::error::{ClusterError, TopologyError};
use crate::host_type::{ClusterHostType, ClusterHostTypeFlags, HostsByType};
use crate::settings::TopologySettings;
use crate::topology::QuorumCommitTopology;

/// Settings for every pool and the topology of a cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterSettings {
    /// Size limits applied to each host's pool.
    pub pool: PoolSettings,
    /// Probe settings.
    pub topology: TopologySettings,
    /// Default command control of each pool and of the probes.
    pub command_control: CommandControl,
    /// Settings passed to the connector.
    pub connection: ConnectionSettings,
}

impl ClusterSettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-host pool settings.
    #[must_use]
    pub fn pool(mut self, settings: PoolSettings) -> Self {
        self.pool = settings;
        self
    }

    /// Set the topology settings.
    #[must_use]
    pub fn topology(mut self, settings: TopologySettings) -> Self {
        self.topology = settings;
        self
    }

    /// Set the default command control.
    #[must_use]
    pub fn command_control(mut self, cc: CommandControl) -> Self {
        self.command_control = cc;
        self
    }

    /// Set the connector settings.
    #[must_use]
    pub fn connection(mut self, settings: ConnectionSettings) -> Self {
        self.connection = settings;
        self
    }
}

/// A replicated cluster: one pool per host, routed by role.
///
/// # Example
///
/// ```rust,ignore
/// use pgcluster_topology::{Cluster, ClusterHostTypeFlags, ClusterSettings};
///
/// let cluster = Cluster::from_dsn(&dsn, connector, ClusterSettings::new()).await?;
/// let deadline = Instant::now() + Duration::from_millis(500);
///
/// let mut trx = cluster
///     .begin(ClusterHostTypeFlags::MASTER, &TransactionOptions::new(), deadline, None)
///     .await?;
/// trx.execute("INSERT INTO events VALUES (1)").await?;
/// trx.commit().await?;
///
/// let mut session = cluster.start(ClusterHostTypeFlags::SLAVE_OR_MASTER, deadline).await?;
/// session.execute("SELECT count(*) FROM events").await?;
/// ```
pub struct Cluster {
    topology: QuorumCommitTopology,
    pools: Vec<Pool>,
    next: AtomicUsize,
}

impl Cluster {
    /// Create a cluster from a multi-host DSN.
    pub async fn from_dsn(
        dsn: &Dsn,
        connector: Arc<dyn Connector>,
        settings: ClusterSettings,
    ) -> Result<Self, ClusterError> {
        Self::new(split_by_host(dsn), connector, settings).await
    }

    /// Create a cluster with one pool per DSN and start topology discovery.
    pub async fn new(
        dsns: Vec<Dsn>,
        connector: Arc<dyn Connector>,
        settings: ClusterSettings,
    ) -> Result<Self, ClusterError> {
        if dsns.is_empty() {
            return Err(TopologyError::Configuration("no hosts given".into()).into());
        }
        settings.pool.validate()?;

        let pools = join_all(dsns.iter().map(|dsn| {
            Pool::builder(dsn.clone(), Arc::clone(&connector))
                .settings(settings.pool)
                .default_command_control(settings.command_control)
                .connection_settings(settings.connection.clone())
                .build()
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, PoolError>>()?;

        let topology =
            QuorumCommitTopology::new(dsns, connector, settings.topology, settings.command_control)
                .await?;

        tracing::info!(
            hosts = pools.len(),
            generation = topology.get_dsn_indices_by_type().generation(),
            "cluster ready"
        );
        Ok(Self {
            topology,
            pools,
            next: AtomicUsize::new(0),
        })
    }

    /// Pick a host index for `flags`.
    ///
    /// Replicas allowed by `flags` are used round-robin; the master only
    /// when no allowed replica is available or none is allowed.
    pub fn select(&self, flags: ClusterHostTypeFlags) -> Result<usize, ClusterError> {
        let snapshot = self.topology.get_dsn_indices_by_type();
        select_from(&snapshot, flags, &self.next).ok_or(ClusterError::NoAvailableHost(flags))
    }

    /// The pool for a host chosen by [`select`](Self::select).
    pub fn pool(&self, flags: ClusterHostTypeFlags) -> Result<&Pool, ClusterError> {
        let index = self.select(flags)?;
        self.pools
            .get(index)
            .ok_or(ClusterError::NoAvailableHost(flags))
    }

    /// Start a transaction on a host matching `flags`.
    pub async fn begin(
        &self,
        flags: ClusterHostTypeFlags,
        options: &TransactionOptions,
        deadline: Instant,
        override_cc: OptionalCommandControl,
    ) -> Result<Transaction, ClusterError> {
        let pool = self.pool(flags)?;
        pool.begin(options, deadline, override_cc)
            .await
            .map_err(|error| self.on_pool_error(pool, error))
    }

    /// Get a non-transactional session on a host matching `flags`.
    pub async fn start(
        &self,
        flags: ClusterHostTypeFlags,
        deadline: Instant,
    ) -> Result<NonTransaction, ClusterError> {
        let pool = self.pool(flags)?;
        pool.start(deadline)
            .await
            .map_err(|error| self.on_pool_error(pool, error))
    }

    /// A failing host may have changed role; probe again without waiting.
    fn on_pool_error(&self, pool: &Pool, error: PoolError) -> ClusterError {
        if matches!(error, PoolError::Connection(_) | PoolError::Timeout { .. }) {
            tracing::debug!(
                dsn = %pool.dsn().masked(),
                error = %error,
                "request failed, rechecking topology"
            );
            self.topology.check_topology();
        }
        error.into()
    }

    /// Replace the default command control of every host's pool.
    ///
    /// An invalid value is rejected before any pool is touched.
    pub fn set_default_command_control(&self, cc: CommandControl) -> Result<(), ClusterError> {
        cc.validate()
            .map_err(|e| PoolError::Configuration(e.to_string()))?;
        for pool in &self.pools {
            pool.set_default_command_control(cc)?;
        }
        Ok(())
    }

    /// The topology tracker.
    #[must_use]
    pub fn topology(&self) -> &QuorumCommitTopology {
        &self.topology
    }

    /// The pool of the host at `index`.
    #[must_use]
    pub fn pool_at(&self, index: usize) -> Option<&Pool> {
        self.pools.get(index)
    }

    /// Metrics of every host's pool, keyed by `host:port`.
    #[must_use]
    pub fn statistics(&self) -> Vec<(String, PoolMetrics)> {
        self.pools
            .iter()
            .map(|pool| (pool.dsn().host_id(), pool.metrics()))
            .collect()
    }

    /// Stop topology discovery and close every pool.
    pub async fn close(&self) {
        self.topology.shutdown().await;
        join_all(self.pools.iter().map(|pool| pool.close())).await;
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("topology", &self.topology)
            .field("pools", &self.pools)
            .finish()
    }
}

fn select_from(
    snapshot: &HostsByType,
    flags: ClusterHostTypeFlags,
    next: &AtomicUsize,
) -> Option<usize> {
    let mut candidates: Vec<usize> = flags
        .preference()
        .into_iter()
        .filter(|role| *role != ClusterHostType::Master)
        .flat_map(|role| snapshot.indices(role))
        .collect();
    if candidates.is_empty() && flags.contains(ClusterHostTypeFlags::MASTER) {
        candidates.extend(snapshot.master());
    }
    if candidates.is_empty() {
        return None;
    }
    let turn = next.fetch_add(1, Ordering::Relaxed);
    candidates.get(turn % candidates.len()).copied()
}
