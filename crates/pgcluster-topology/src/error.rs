//! Topology and routing error types.

use pgcluster_pool::PoolError;
use thiserror::Error;

use crate::host_type::ClusterHostTypeFlags;

/// Errors raised while tracking the cluster topology.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TopologyError {
    /// A probe round did not find exactly one master.
    ///
    /// Never returned to callers; the round keeps the previous snapshot.
    #[error("inconsistent topology: {masters} hosts claim to be master")]
    Inconsistent {
        /// Number of hosts that reported themselves writable.
        masters: usize,
    },

    /// Invalid topology settings or host list.
    #[error("invalid topology configuration: {0}")]
    Configuration(String),

    /// A probe pool could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors returned by [`Cluster`](crate::Cluster).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The current snapshot has no host of the requested kind.
    #[error("no available host for {0:?}")]
    NoAvailableHost(ClusterHostTypeFlags),

    /// The cluster could not be set up.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// The selected host's pool failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<pgcluster_client::Error> for ClusterError {
    fn from(error: pgcluster_client::Error) -> Self {
        Self::Pool(PoolError::Connection(error))
    }
}
