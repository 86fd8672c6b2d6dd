//! # pgcluster-topology
//!
//! Role discovery for a replicated cluster with quorum commit.
//!
//! [`QuorumCommitTopology`] probes every host in the background, decides
//! which one is master, which replicas are synchronous, and which replicas
//! are close enough to the master to serve reads. The result is published
//! as an immutable [`HostsByType`] snapshot that readers load without
//! locking.
//!
//! [`Cluster`] adds one connection pool per host and routes each request by
//! [`ClusterHostTypeFlags`].
//!
//! ## Classification
//!
//! | Probe result | Role |
//! |---|---|
//! | writable, exactly one in the round | `Master` |
//! | read-only, listed by the master as synchronous | `SyncSlave` |
//! | read-only, lag within `max_replication_lag` | `Slave` |
//! | read-only, lagging too far | `Excluded` |
//! | failed or timed out | `Excluded` |
//!
//! A round with zero or several writable hosts publishes nothing; readers
//! keep the last consistent generation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgcluster_topology::{ClusterHostType, QuorumCommitTopology, TopologySettings};
//!
//! let topology = QuorumCommitTopology::new(
//!     split_by_host(&dsn),
//!     connector,
//!     TopologySettings::new().max_replication_lag(Duration::from_secs(30)),
//!     CommandControl::default(),
//! )
//! .await?;
//!
//! let hosts = topology.get_dsn_indices_by_type();
//! if let Some(master) = hosts.master() {
//!     println!("master is {}", topology.dsns()[master].host_id());
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classify;
pub mod cluster;
pub mod error;
pub mod host_type;
pub mod settings;
pub mod topology;

pub use classify::{HostProbe, HostState, classify};
pub use cluster::{Cluster, ClusterSettings};
pub use error::{ClusterError, TopologyError};
pub use host_type::{ClusterHostType, ClusterHostTypeFlags, HostsByType, RoleMap};
pub use settings::TopologySettings;
pub use topology::QuorumCommitTopology;
