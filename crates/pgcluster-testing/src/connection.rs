//! Mock connector and connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgcluster_client::{
    CommandControl, Connection, ConnectionSettings, ConnectionStatistics, Connector, Dsn, Error,
    Result,
};

/// Behaviour of one mock host, keyed by `host:port`.
#[derive(Debug, Clone, Default)]
struct HostBehavior {
    read_only: bool,
    replication_lag: Option<Duration>,
    sync_standbys: Vec<String>,
    unreachable: bool,
    connect_delay: Duration,
    probe_delay: Duration,
    fail_begin: bool,
}

#[derive(Debug, Default)]
struct State {
    hosts: HashMap<String, HostBehavior>,
    next_id: u64,
    connects: u64,
    connect_failures: u64,
    open: usize,
    peak_open: usize,
    statements: Vec<ExecutedStatement>,
}

impl State {
    fn behavior(&self, host_id: &str) -> HostBehavior {
        self.hosts.get(host_id).cloned().unwrap_or_default()
    }
}

/// A statement a mock connection received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// Connection that ran it.
    pub connection_id: u64,
    /// `host:port` of the connection.
    pub host_id: String,
    /// Statement text.
    pub sql: String,
    /// Command control it ran with.
    pub command_control: CommandControl,
}

/// Connector producing [`MockConnection`]s.
///
/// Clones share state. Hosts that were never configured behave as a
/// reachable master.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
}

impl MockConnector {
    /// Connector with no configured hosts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings handle for `host_id` (`host:port`).
    #[must_use]
    pub fn host(&self, host_id: &str) -> HostHandle {
        self.state
            .lock()
            .hosts
            .entry(host_id.to_string())
            .or_default();
        HostHandle {
            state: Arc::clone(&self.state),
            host_id: host_id.to_string(),
        }
    }

    /// Successful connects so far.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.state.lock().connects
    }

    /// Failed connects so far.
    #[must_use]
    pub fn connect_failures(&self) -> u64 {
        self.state.lock().connect_failures
    }

    /// Connections currently alive.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Highest number of simultaneously alive connections.
    #[must_use]
    pub fn peak_open_connections(&self) -> usize {
        self.state.lock().peak_open
    }

    /// Every statement executed so far, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state.lock().statements.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        dsn: &Dsn,
        _settings: &ConnectionSettings,
        _cc: &CommandControl,
    ) -> Result<Box<dyn Connection>> {
        let host_id = dsn.host_id();
        let delay = self.state.lock().behavior(&host_id).connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.behavior(&host_id).unreachable {
            state.connect_failures += 1;
            return Err(Error::ConnectionFailed {
                dsn: dsn.masked(),
                reason: "connection refused".into(),
            });
        }

        state.next_id += 1;
        state.connects += 1;
        state.open += 1;
        state.peak_open = state.peak_open.max(state.open);
        tracing::trace!(host = %host_id, id = state.next_id, "mock connection opened");

        Ok(Box::new(MockConnection {
            id: state.next_id,
            host_id,
            state: Arc::clone(&self.state),
            broken: false,
            in_transaction: false,
            stats: ConnectionStatistics::default(),
        }))
    }
}

/// Mutates the behaviour of one mock host.
#[derive(Debug, Clone)]
pub struct HostHandle {
    state: Arc<Mutex<State>>,
    host_id: String,
}

impl HostHandle {
    fn update(&self, f: impl FnOnce(&mut HostBehavior)) -> &Self {
        let mut state = self.state.lock();
        f(state.hosts.entry(self.host_id.clone()).or_default());
        self
    }

    /// Make the host a writable master.
    pub fn master(&self) -> &Self {
        self.update(|h| {
            h.read_only = false;
            h.replication_lag = None;
        })
    }

    /// Make the host a read-only standby with the given lag.
    pub fn replica(&self, lag: Duration) -> &Self {
        self.update(|h| {
            h.read_only = true;
            h.replication_lag = Some(lag);
        })
    }

    /// Standbys the host reports as synchronous while it is master.
    pub fn sync_standbys<I, S>(&self, standbys: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let standbys: Vec<String> = standbys.into_iter().map(Into::into).collect();
        self.update(|h| h.sync_standbys = standbys)
    }

    /// Refuse connects and break live connections on their next call.
    pub fn unreachable(&self, unreachable: bool) -> &Self {
        self.update(|h| h.unreachable = unreachable)
    }

    /// Delay every connect.
    pub fn connect_delay(&self, delay: Duration) -> &Self {
        self.update(|h| h.connect_delay = delay)
    }

    /// Delay every role probe.
    pub fn probe_delay(&self, delay: Duration) -> &Self {
        self.update(|h| h.probe_delay = delay)
    }

    /// Make `BEGIN` fail.
    pub fn fail_begin(&self, fail: bool) -> &Self {
        self.update(|h| h.fail_begin = fail)
    }
}

/// In-memory session created by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    host_id: String,
    state: Arc<Mutex<State>>,
    broken: bool,
    in_transaction: bool,
    stats: ConnectionStatistics,
}

impl MockConnection {
    /// Fail with a connection error if the host went away.
    fn check_reachable(&mut self) -> Result<HostBehavior> {
        let behavior = self.state.lock().behavior(&self.host_id);
        if behavior.unreachable {
            self.broken = true;
            return Err(Error::ConnectionLost(format!("{} went away", self.host_id)));
        }
        Ok(behavior)
    }

    async fn probe(&mut self) -> Result<HostBehavior> {
        let delay = self.state.lock().behavior(&self.host_id).probe_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, sql: &str, cc: &CommandControl) -> Result<u64> {
        let behavior = self.check_reachable()?;
        self.state.lock().statements.push(ExecutedStatement {
            connection_id: self.id,
            host_id: self.host_id.clone(),
            sql: sql.to_string(),
            command_control: *cc,
        });

        let upper = sql.trim_start().to_ascii_uppercase();
        if upper.starts_with("BEGIN") {
            if behavior.fail_begin {
                self.stats.error_execute_total += 1;
                return Err(Error::Query("could not start transaction".into()));
            }
            self.in_transaction = true;
            self.stats.trx_total += 1;
        } else if upper.starts_with("COMMIT") {
            self.in_transaction = false;
            self.stats.commit_total += 1;
        } else if upper.starts_with("ROLLBACK") {
            self.in_transaction = false;
            self.stats.rollback_total += 1;
        } else {
            self.stats.execute_total += 1;
        }
        Ok(0)
    }

    async fn is_read_only(&mut self, _cc: &CommandControl) -> Result<bool> {
        Ok(self.probe().await?.read_only)
    }

    async fn replication_lag(&mut self, _cc: &CommandControl) -> Result<Option<Duration>> {
        let behavior = self.probe().await?;
        Ok(behavior.read_only.then_some(behavior.replication_lag).flatten())
    }

    async fn synchronous_standbys(&mut self, _cc: &CommandControl) -> Result<Vec<String>> {
        let behavior = self.probe().await?;
        Ok(if behavior.read_only {
            Vec::new()
        } else {
            behavior.sync_standbys
        })
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn is_idle(&self) -> bool {
        !self.in_transaction
    }

    fn take_statistics(&mut self) -> ConnectionStatistics {
        std::mem::take(&mut self.stats)
    }

    async fn close(self: Box<Self>) {
        tracing::trace!(host = %self.host_id, id = self.id, "mock connection closed");
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.lock().open -= 1;
    }
}
