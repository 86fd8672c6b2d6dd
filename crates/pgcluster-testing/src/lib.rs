//! # pgcluster-testing
//!
//! In-memory stand-ins for database servers, used by the pool and topology
//! test suites.
//!
//! A [`MockConnector`] hands out [`MockConnection`]s whose behaviour is driven
//! by per-host settings that tests change while the code under test runs:
//! flip a host between master and replica, set its replication lag, make it
//! unreachable, slow down connects, or make `BEGIN` fail.
//!
//! ```rust
//! use std::time::Duration;
//! use pgcluster_testing::MockConnector;
//!
//! let connector = MockConnector::new();
//! connector.host("db1:5432").master().sync_standbys(["db2:5432"]);
//! connector.host("db2:5432").replica(Duration::from_secs(1));
//! connector.host("db3:5432").unreachable(true);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod connection;

pub use connection::{ExecutedStatement, HostHandle, MockConnection, MockConnector};

/// Install a test-friendly `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
