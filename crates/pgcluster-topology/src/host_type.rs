//! Host roles and the published role snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;

use bitflags::bitflags;

/// Role of a cluster host as of one probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterHostType {
    /// The single writable host.
    Master,
    /// A replica the master acknowledges commits from.
    SyncSlave,
    /// An asynchronous replica within the lag limit.
    Slave,
    /// Unreachable, or a replica lagging beyond the limit.
    Excluded,
}

impl ClusterHostType {
    /// Lower-case name used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::SyncSlave => "sync_slave",
            Self::Slave => "slave",
            Self::Excluded => "excluded",
        }
    }
}

impl fmt::Display for ClusterHostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Host kinds a caller is willing to use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClusterHostTypeFlags: u8 {
        /// The master.
        const MASTER = 0b0001;
        /// Synchronous replicas.
        const SYNC_SLAVE = 0b0010;
        /// Asynchronous replicas.
        const SLAVE = 0b0100;
        /// Any replica.
        const ANY_SLAVE = Self::SYNC_SLAVE.bits() | Self::SLAVE.bits();
        /// Any replica, falling back to the master.
        const SLAVE_OR_MASTER = Self::ANY_SLAVE.bits() | Self::MASTER.bits();
    }
}

impl ClusterHostTypeFlags {
    /// Roles to try, in order of preference.
    ///
    /// Replicas are preferred over the master when both are allowed.
    #[must_use]
    pub fn preference(self) -> Vec<ClusterHostType> {
        [
            (Self::SYNC_SLAVE, ClusterHostType::SyncSlave),
            (Self::SLAVE, ClusterHostType::Slave),
            (Self::MASTER, ClusterHostType::Master),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, role)| role)
        .collect()
    }
}

/// Host indices grouped by role.
pub type RoleMap = BTreeMap<ClusterHostType, BTreeSet<usize>>;

/// One published generation of the cluster classification.
///
/// Indices refer to the host list the topology was created with. Roles
/// without hosts are absent. Dereferences to the role map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsByType {
    generation: u64,
    hosts: RoleMap,
}

impl HostsByType {
    pub(crate) fn new(generation: u64, hosts: RoleMap) -> Self {
        Self { generation, hosts }
    }

    /// Publish number. Zero until the first consistent round.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hosts with the given role; empty when there are none.
    pub fn indices(&self, role: ClusterHostType) -> impl Iterator<Item = usize> + '_ {
        self.hosts.get(&role).into_iter().flatten().copied()
    }

    /// The master's index, if one is known.
    #[must_use]
    pub fn master(&self) -> Option<usize> {
        self.indices(ClusterHostType::Master).next()
    }

    /// Role of the host at `index`, if it was classified.
    #[must_use]
    pub fn role_of(&self, index: usize) -> Option<ClusterHostType> {
        self.hosts
            .iter()
            .find(|(_, indices)| indices.contains(&index))
            .map(|(role, _)| *role)
    }

    /// The role map.
    #[must_use]
    pub fn roles(&self) -> &RoleMap {
        &self.hosts
    }
}

impl Deref for HostsByType {
    type Target = RoleMap;

    fn deref(&self) -> &Self::Target {
        &self.hosts
    }
}
