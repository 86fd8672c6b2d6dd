//! Quorum-commit topology tracker.
//!
//! A background task probes every host on a fixed interval, or sooner when
//! [`QuorumCommitTopology::check_topology`] asks for it. Each round fans out
//! one probe per host, classifies the results and publishes the new role
//! map with a single pointer swap. Rounds that do not find exactly one
//! master keep the previous snapshot.

use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use pgcluster_client::{CommandControl, Connector, Dsn};
use pgcluster_pool::{NonTransaction, Pool, PoolError, rcu};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::classify::{HostProbe, HostState, classify};
use crate::error::TopologyError;
use crate::host_type::HostsByType;
use crate::settings::TopologySettings;

/// Tracks which cluster host is master and which replicas are usable.
///
/// Readers call [`get_dsn_indices_by_type`](Self::get_dsn_indices_by_type),
/// which never blocks and always returns a complete generation.
pub struct QuorumCommitTopology {
    inner: Arc<TopologyInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct TopologyInner {
    dsns: Vec<Dsn>,
    host_ids: Vec<String>,
    pools: Vec<Pool>,
    settings: TopologySettings,
    cmd_ctl: CommandControl,
    snapshot: rcu::Variable<HostsByType>,
    check_requested: Notify,
    shutdown: CancellationToken,
}

impl QuorumCommitTopology {
    /// Probe the cluster once and start the background loop.
    ///
    /// `dsns` holds one DSN per host; their order fixes the indices used in
    /// snapshots. An inconsistent first round is not an error: the snapshot
    /// stays empty until a consistent round completes.
    pub async fn new(
        dsns: Vec<Dsn>,
        connector: Arc<dyn Connector>,
        settings: TopologySettings,
        cmd_ctl: CommandControl,
    ) -> Result<Self, TopologyError> {
        settings.validate()?;
        if dsns.is_empty() {
            return Err(TopologyError::Configuration("no hosts given".into()));
        }

        let mut pools = Vec::with_capacity(dsns.len());
        for dsn in &dsns {
            let pool = Pool::builder(dsn.clone(), Arc::clone(&connector))
                .initial_size(0)
                .max_size(1)
                .max_queue_size(1)
                .default_command_control(cmd_ctl)
                .build()
                .await?;
            pools.push(pool);
        }

        let inner = Arc::new(TopologyInner {
            host_ids: dsns.iter().map(Dsn::host_id).collect(),
            dsns,
            pools,
            settings,
            cmd_ctl,
            snapshot: rcu::Variable::default(),
            check_requested: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        tracing::info!(
            hosts = ?inner.host_ids,
            max_replication_lag = ?settings.lag_limit(),
            probe_interval = ?settings.probe_interval,
            "starting topology discovery"
        );
        inner.run_round().await;

        let task = tokio::spawn(Arc::clone(&inner).run());
        Ok(Self {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    /// The latest published classification.
    ///
    /// Never blocks. While the cluster is unreachable or split this keeps
    /// returning the last consistent generation.
    #[must_use]
    pub fn get_dsn_indices_by_type(&self) -> Arc<HostsByType> {
        self.inner.snapshot.read()
    }

    /// Run a probe round as soon as possible instead of waiting for the
    /// next interval. Requests made while a round is pending coalesce.
    pub fn check_topology(&self) {
        self.inner.check_requested.notify_one();
    }

    /// Host DSNs, in index order.
    #[must_use]
    pub fn dsns(&self) -> &[Dsn] {
        &self.inner.dsns
    }

    /// Settings the topology runs with.
    #[must_use]
    pub fn settings(&self) -> &TopologySettings {
        &self.inner.settings
    }

    /// Stop the probe loop and close the probe connections.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "topology task ended abnormally");
            }
        }
        join_all(self.inner.pools.iter().map(|pool| pool.close())).await;
        tracing::info!("topology discovery stopped");
    }
}

impl Drop for QuorumCommitTopology {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for QuorumCommitTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumCommitTopology")
            .field("hosts", &self.inner.host_ids)
            .field("snapshot", &self.inner.snapshot)
            .finish()
    }
}

impl TopologyInner {
    async fn run(self: Arc<Self>) {
        let period = self.settings.probe_interval;
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.check_requested.notified() => {
                    tracing::debug!("topology check requested");
                    tick.reset();
                }
                _ = tick.tick() => {}
            }

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.run_round() => {}
            }
        }
        tracing::debug!("topology loop exited");
    }

    /// Probe every host and publish the result if it is consistent.
    async fn run_round(&self) {
        let deadline = Instant::now() + self.settings.probe_timeout;
        let probes: Vec<HostProbe> = join_all(
            self.pools
                .iter()
                .zip(&self.host_ids)
                .map(|(pool, host_id)| self.probe(pool, host_id, deadline)),
        )
        .await;

        let roles = match classify(&probes, self.settings.lag_limit()) {
            Ok(roles) => roles,
            Err(error) => {
                let current = self.snapshot.read();
                tracing::warn!(
                    error = %error,
                    generation = current.generation(),
                    "keeping previous topology"
                );
                return;
            }
        };

        let previous = self.snapshot.read();
        let generation = previous.generation() + 1;
        if previous.roles() != &roles {
            tracing::info!(generation, roles = ?roles, "topology changed");
        } else {
            tracing::trace!(generation, "topology unchanged");
        }
        self.snapshot.assign(HostsByType::new(generation, roles));
    }

    async fn probe(&self, pool: &Pool, host_id: &str, deadline: Instant) -> HostProbe {
        let state = match pool.start(deadline).await {
            Ok(session) => {
                let mut session = session.with_command_control(self.cmd_ctl);
                match tokio::time::timeout_at(deadline, probe_role(&mut session)).await {
                    Ok(Ok(state)) => state,
                    Ok(Err(error)) => {
                        tracing::warn!(host = host_id, error = %error, "host probe failed");
                        HostState::Unreachable
                    }
                    Err(_) => {
                        tracing::warn!(host = host_id, "host probe timed out");
                        session.mark_broken();
                        HostState::Unreachable
                    }
                }
            }
            Err(error) => {
                tracing::warn!(host = host_id, error = %error, "host unreachable");
                HostState::Unreachable
            }
        };
        tracing::trace!(host = host_id, state = ?state, "host probed");
        HostProbe::new(host_id, state)
    }
}

async fn probe_role(session: &mut NonTransaction) -> Result<HostState, PoolError> {
    if session.is_read_only().await? {
        let lag = session.replication_lag().await?;
        Ok(HostState::Replica { lag })
    } else {
        let sync_standbys = session.synchronous_standbys().await?;
        Ok(HostState::Master { sync_standbys })
    }
}
