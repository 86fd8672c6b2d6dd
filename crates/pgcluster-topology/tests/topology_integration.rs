//! Topology discovery and routing tests against scripted mock hosts.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pgcluster_client::{CommandControl, Dsn, TransactionOptions};
use pgcluster_pool::{PoolError, PoolSettings};
use pgcluster_testing::{MockConnector, init_tracing};
use pgcluster_topology::{
    Cluster, ClusterError, ClusterHostType, ClusterHostTypeFlags, ClusterSettings,
    QuorumCommitTopology, TopologyError, TopologySettings,
};
use tokio::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

const A: &str = "a:5432";
const B: &str = "b:5432";
const C: &str = "c:5432";

fn dsns(hosts: &[&str]) -> Vec<Dsn> {
    hosts
        .iter()
        .map(|host| {
            let (name, port) = host.split_once(':').unwrap();
            Dsn::parse(&format!("host={name} port={port} dbname=app user=app")).unwrap()
        })
        .collect()
}

fn settings() -> TopologySettings {
    TopologySettings::new()
        .max_replication_lag(Duration::from_secs(60))
        .probe_interval(Duration::from_secs(1))
        .probe_timeout(Duration::from_millis(200))
}

async fn topology(connector: &MockConnector, settings: TopologySettings) -> QuorumCommitTopology {
    init_tracing();
    QuorumCommitTopology::new(
        dsns(&[A, B, C]),
        Arc::new(connector.clone()),
        settings,
        CommandControl::default(),
    )
    .await
    .unwrap()
}

fn set(indices: &[usize]) -> BTreeSet<usize> {
    indices.iter().copied().collect()
}

fn healthy_cluster() -> MockConnector {
    let connector = MockConnector::new();
    connector.host(A).master();
    connector.host(B).replica(Duration::from_secs(1));
    connector.host(C).replica(Duration::from_secs(1));
    connector
}

/// Let the background loop run a requested round.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Classification
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_lagging_replica_is_excluded() {
    let connector = MockConnector::new();
    connector.host(A).master();
    connector.host(B).replica(Duration::from_secs(5));
    connector.host(C).replica(Duration::from_secs(200));

    let topology = topology(&connector, settings()).await;
    let hosts = topology.get_dsn_indices_by_type();

    assert_eq!(hosts.generation(), 1);
    assert_eq!(hosts.get(&ClusterHostType::Master), Some(&set(&[0])));
    assert_eq!(hosts.get(&ClusterHostType::Slave), Some(&set(&[1])));
    assert_eq!(hosts.get(&ClusterHostType::Excluded), Some(&set(&[2])));
    assert!(!hosts.contains_key(&ClusterHostType::SyncSlave));
}

#[tokio::test(start_paused = true)]
async fn test_zero_lag_limit_accepts_all_replicas() {
    let connector = MockConnector::new();
    connector.host(A).replica(Duration::from_secs(5));
    connector.host(B).master();
    connector.host(C).replica(Duration::from_secs(3_600));

    let topology = topology(&connector, settings().max_replication_lag(Duration::ZERO)).await;
    let hosts = topology.get_dsn_indices_by_type();

    assert_eq!(hosts.master(), Some(1));
    assert_eq!(hosts.get(&ClusterHostType::Slave), Some(&set(&[0, 2])));
    assert!(!hosts.contains_key(&ClusterHostType::Excluded));
}

#[tokio::test(start_paused = true)]
async fn test_synchronous_standby_is_sync_slave() {
    let connector = MockConnector::new();
    connector.host(A).master().sync_standbys([C]);
    connector.host(B).replica(Duration::from_secs(1));
    connector.host(C).replica(Duration::from_secs(120));

    let topology = topology(&connector, settings()).await;
    let hosts = topology.get_dsn_indices_by_type();

    assert_eq!(hosts.get(&ClusterHostType::SyncSlave), Some(&set(&[2])));
    assert_eq!(hosts.get(&ClusterHostType::Slave), Some(&set(&[1])));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_host_is_excluded() {
    let connector = MockConnector::new();
    connector.host(A).master();
    connector.host(B).unreachable(true);
    connector.host(C).replica(Duration::from_secs(1));

    let started = Instant::now();
    let topology = topology(&connector, settings()).await;
    let hosts = topology.get_dsn_indices_by_type();

    assert!(started.elapsed() <= Duration::from_millis(250));
    assert_eq!(hosts.get(&ClusterHostType::Excluded), Some(&set(&[1])));
    assert_eq!(hosts.get(&ClusterHostType::Slave), Some(&set(&[2])));
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_is_bounded_by_probe_timeout() {
    let connector = MockConnector::new();
    connector.host(A).master();
    connector.host(B).replica(Duration::ZERO).probe_delay(Duration::from_secs(30));
    connector.host(C).replica(Duration::ZERO);

    let started = Instant::now();
    let topology = topology(&connector, settings()).await;

    assert!(started.elapsed() <= Duration::from_millis(250));
    let hosts = topology.get_dsn_indices_by_type();
    assert_eq!(hosts.role_of(1), Some(ClusterHostType::Excluded));
    assert_eq!(hosts.role_of(2), Some(ClusterHostType::Slave));
}

// =============================================================================
// Inconsistent rounds
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_split_brain_keeps_previous_snapshot() {
    let connector = healthy_cluster();

    let topology = topology(&connector, settings()).await;
    let before = topology.get_dsn_indices_by_type();

    connector.host(B).master();
    topology.check_topology();
    settle().await;

    let after = topology.get_dsn_indices_by_type();
    assert_eq!(*after, *before);
    assert_eq!(after.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_total_host_loss_keeps_last_good_snapshot() {
    let connector = healthy_cluster();

    let topology = topology(&connector, settings()).await;
    let before = topology.get_dsn_indices_by_type();

    for host in [A, B, C] {
        connector.host(host).unreachable(true);
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(*topology.get_dsn_indices_by_type(), *before);
}

#[tokio::test(start_paused = true)]
async fn test_first_round_without_master_publishes_nothing() {
    let connector = MockConnector::new();
    for host in [A, B, C] {
        connector.host(host).replica(Duration::ZERO);
    }

    let topology = topology(&connector, settings()).await;
    let hosts = topology.get_dsn_indices_by_type();
    assert_eq!(hosts.generation(), 0);
    assert!(hosts.is_empty());

    connector.host(C).master();
    topology.check_topology();
    settle().await;

    let hosts = topology.get_dsn_indices_by_type();
    assert_eq!(hosts.generation(), 1);
    assert_eq!(hosts.master(), Some(2));
}

// =============================================================================
// Background loop
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failover_is_detected_on_next_interval() {
    let connector = healthy_cluster();

    let topology = topology(&connector, settings()).await;
    assert_eq!(topology.get_dsn_indices_by_type().master(), Some(0));

    connector.host(A).unreachable(true);
    connector.host(B).master();
    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let hosts = topology.get_dsn_indices_by_type();
    assert_eq!(hosts.master(), Some(1));
    assert_eq!(hosts.role_of(0), Some(ClusterHostType::Excluded));
    assert_eq!(hosts.role_of(2), Some(ClusterHostType::Slave));
    assert_eq!(hosts.generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_generations_increase_every_round() {
    let connector = healthy_cluster();
    let topology = topology(&connector, settings()).await;
    assert_eq!(topology.get_dsn_indices_by_type().generation(), 1);

    tokio::time::sleep(Duration::from_millis(3_100)).await;
    assert_eq!(topology.get_dsn_indices_by_type().generation(), 4);

    topology.check_topology();
    settle().await;
    assert_eq!(topology.get_dsn_indices_by_type().generation(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_probing() {
    let connector = healthy_cluster();
    let topology = topology(&connector, settings()).await;

    topology.shutdown().await;
    let generation = topology.get_dsn_indices_by_type().generation();
    tokio::time::sleep(Duration::from_secs(5)).await;
    topology.check_topology();
    settle().await;

    assert_eq!(topology.get_dsn_indices_by_type().generation(), generation);
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let connector = Arc::new(MockConnector::new());

    let err = assert_err!(
        QuorumCommitTopology::new(Vec::new(), connector.clone(), settings(), CommandControl::default())
            .await
    );
    assert!(matches!(err, TopologyError::Configuration(_)));

    let err = assert_err!(
        QuorumCommitTopology::new(
            dsns(&[A]),
            connector,
            settings().probe_interval(Duration::ZERO),
            CommandControl::default(),
        )
        .await
    );
    assert!(matches!(err, TopologyError::Configuration(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_always_see_complete_generations() {
    let connector = healthy_cluster();

    let topology = Arc::new(
        topology(
            &connector,
            settings()
                .probe_interval(Duration::from_millis(2))
                .probe_timeout(Duration::from_secs(1)),
        )
        .await,
    );
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let topology = Arc::clone(&topology);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut last_generation = 0;
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) {
                    let hosts = topology.get_dsn_indices_by_type();
                    assert!(hosts.generation() >= last_generation);
                    last_generation = hosts.generation();

                    let classified: usize = hosts.values().map(BTreeSet::len).sum();
                    assert_eq!(classified, 3);
                    assert_eq!(hosts.master(), Some(0));
                    reads += 1;
                    tokio::task::yield_now().await;
                }
                reads
            })
        })
        .collect();

    for round in 0..20u64 {
        let lag = if round % 2 == 0 { 600 } else { 1 };
        connector.host(C).replica(Duration::from_secs(lag));
        topology.check_topology();
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    assert!(topology.get_dsn_indices_by_type().generation() > 1);
}

// =============================================================================
// Cluster routing
// =============================================================================

async fn cluster(connector: &MockConnector) -> Cluster {
    init_tracing();
    Cluster::new(
        dsns(&[A, B, C]),
        Arc::new(connector.clone()),
        ClusterSettings::new()
            .pool(PoolSettings::new().initial_size(0).max_size(4))
            .topology(settings()),
    )
    .await
    .unwrap()
}

fn hosts_of(connector: &MockConnector, sql: &str) -> BTreeSet<String> {
    connector
        .statements()
        .into_iter()
        .filter(|s| s.sql == sql)
        .map(|s| s.host_id)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_writes_go_to_master() {
    let connector = MockConnector::new();
    connector.host(A).replica(Duration::from_secs(1));
    connector.host(B).master();
    connector.host(C).replica(Duration::from_secs(1));
    let cluster = cluster(&connector).await;
    let deadline = Instant::now() + Duration::from_millis(100);

    let mut trx = assert_ok!(
        cluster
            .begin(ClusterHostTypeFlags::MASTER, &TransactionOptions::new(), deadline, None)
            .await
    );
    assert_ok!(trx.execute("INSERT INTO t VALUES (1)").await);
    assert_ok!(trx.commit().await);

    assert_eq!(hosts_of(&connector, "INSERT INTO t VALUES (1)"), BTreeSet::from([B.to_string()]));
}

#[tokio::test(start_paused = true)]
async fn test_reads_spread_over_replicas() {
    let connector = healthy_cluster();
    let cluster = cluster(&connector).await;

    for _ in 0..4 {
        let deadline = Instant::now() + Duration::from_millis(100);
        let mut session = assert_ok!(cluster.start(ClusterHostTypeFlags::SLAVE_OR_MASTER, deadline).await);
        assert_ok!(session.execute("SELECT 1").await);
    }

    assert_eq!(
        hosts_of(&connector, "SELECT 1"),
        BTreeSet::from([B.to_string(), C.to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_available_host() {
    let connector = MockConnector::new();
    connector.host(A).master();
    connector.host(B).replica(Duration::from_secs(600));
    connector.host(C).unreachable(true);
    let cluster = cluster(&connector).await;

    let err = assert_err!(cluster.select(ClusterHostTypeFlags::ANY_SLAVE));
    assert!(matches!(err, ClusterError::NoAvailableHost(_)));
    assert_eq!(assert_ok!(cluster.select(ClusterHostTypeFlags::SLAVE_OR_MASTER)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_command_control_leaves_every_pool_unchanged() {
    let cluster = cluster(&healthy_cluster()).await;
    let current = cluster.pool_at(0).unwrap().default_command_control();

    let err = assert_err!(cluster.set_default_command_control(
        CommandControl::default().with_statement_timeout(Duration::ZERO)
    ));
    assert!(matches!(err, ClusterError::Pool(PoolError::Configuration(_))));
    for index in 0..3 {
        assert_eq!(cluster.pool_at(index).unwrap().default_command_control(), current);
    }

    let cc = CommandControl::default().with_statement_timeout(Duration::from_millis(750));
    assert_ok!(cluster.set_default_command_control(cc));
    for index in 0..3 {
        assert_eq!(cluster.pool_at(index).unwrap().default_command_control(), cc);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_triggers_recheck() {
    let connector = healthy_cluster();
    let cluster = cluster(&connector).await;
    assert_eq!(cluster.topology().get_dsn_indices_by_type().generation(), 1);

    connector.host(A).unreachable(true);
    connector.host(C).master();
    let deadline = Instant::now() + Duration::from_millis(50);
    assert!(cluster.start(ClusterHostTypeFlags::MASTER, deadline).await.is_err());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let hosts = cluster.topology().get_dsn_indices_by_type();
    assert_eq!(hosts.generation(), 2);
    assert_eq!(hosts.master(), Some(2));
    assert_eq!(assert_ok!(cluster.select(ClusterHostTypeFlags::MASTER)), 2);

    cluster.close().await;
    assert!(cluster.pool_at(0).unwrap().is_closed());
}
