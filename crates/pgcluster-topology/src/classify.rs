//! Classification of probe results into host roles.
//!
//! Pure and synchronous so it can be tested without a cluster.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::TopologyError;
use crate::host_type::{ClusterHostType, RoleMap};

/// What one probe learned about a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostState {
    /// The probe failed or timed out.
    Unreachable,
    /// The host accepts writes.
    Master {
        /// `host:port` of the replicas the host treats as synchronous.
        sync_standbys: Vec<String>,
    },
    /// A read-only replica.
    Replica {
        /// How far behind the master it is, if the server reports it.
        lag: Option<Duration>,
    },
}

/// A probed host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProbe {
    /// `host:port` of the host, matched against `sync_standbys`.
    pub host_id: String,
    /// Probe outcome.
    pub state: HostState,
}

impl HostProbe {
    /// Probe outcome for `host_id`.
    pub fn new(host_id: impl Into<String>, state: HostState) -> Self {
        Self {
            host_id: host_id.into(),
            state,
        }
    }
}

/// Derive host roles from one round of probes.
///
/// Index `i` of the result refers to `probes[i]`. Exactly one host must be
/// writable, otherwise the round is [`TopologyError::Inconsistent`].
/// Replicas the master lists as synchronous become `SyncSlave` whatever their
/// lag. Other replicas are `Slave` when their lag is within `max_lag` (always,
/// when `max_lag` is `None`) and `Excluded` otherwise; a replica that does not
/// report lag counts as caught up. Unreachable hosts are `Excluded`.
pub fn classify(probes: &[HostProbe], max_lag: Option<Duration>) -> Result<RoleMap, TopologyError> {
    let masters: Vec<(usize, &[String])> = probes
        .iter()
        .enumerate()
        .filter_map(|(index, probe)| match &probe.state {
            HostState::Master { sync_standbys } => Some((index, sync_standbys.as_slice())),
            _ => None,
        })
        .collect();

    let [(master, sync_standbys)] = masters.as_slice() else {
        return Err(TopologyError::Inconsistent {
            masters: masters.len(),
        });
    };

    let mut roles = RoleMap::new();
    let mut assign = |role: ClusterHostType, index: usize| {
        roles.entry(role).or_insert_with(BTreeSet::new).insert(index);
    };
    assign(ClusterHostType::Master, *master);

    for (index, probe) in probes.iter().enumerate() {
        match probe.state {
            HostState::Master { .. } => {}
            HostState::Unreachable => assign(ClusterHostType::Excluded, index),
            HostState::Replica { lag } => {
                let role = if sync_standbys.iter().any(|s| *s == probe.host_id) {
                    ClusterHostType::SyncSlave
                } else if within_limit(lag, max_lag) {
                    ClusterHostType::Slave
                } else {
                    ClusterHostType::Excluded
                };
                assign(role, index);
            }
        }
    }

    Ok(roles)
}

fn within_limit(lag: Option<Duration>, max_lag: Option<Duration>) -> bool {
    match (lag, max_lag) {
        (Some(lag), Some(max)) => lag <= max,
        _ => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn replica(host: &str, lag_secs: u64) -> HostProbe {
        HostProbe::new(
            host,
            HostState::Replica {
                lag: Some(Duration::from_secs(lag_secs)),
            },
        )
    }

    fn master(host: &str, sync: &[&str]) -> HostProbe {
        HostProbe::new(
            host,
            HostState::Master {
                sync_standbys: sync.iter().map(|s| (*s).to_string()).collect(),
            },
        )
    }

    fn set(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[test]
    fn test_lagging_replica_is_excluded() {
        let probes = [master("a:5432", &[]), replica("b:5432", 5), replica("c:5432", 200)];
        let roles = classify(&probes, Some(Duration::from_secs(60))).unwrap();

        assert_eq!(roles.get(&ClusterHostType::Master), Some(&set(&[0])));
        assert_eq!(roles.get(&ClusterHostType::Slave), Some(&set(&[1])));
        assert_eq!(roles.get(&ClusterHostType::Excluded), Some(&set(&[2])));
        assert!(!roles.contains_key(&ClusterHostType::SyncSlave));
    }

    #[test]
    fn test_lag_at_limit_is_accepted() {
        let probes = [master("a:5432", &[]), replica("b:5432", 60)];
        let roles = classify(&probes, Some(Duration::from_secs(60))).unwrap();
        assert_eq!(roles.get(&ClusterHostType::Slave), Some(&set(&[1])));
    }

    #[test]
    fn test_no_lag_limit_accepts_every_replica() {
        let probes = [replica("b:5432", 5), master("a:5432", &[]), replica("c:5432", 86_400)];
        let roles = classify(&probes, None).unwrap();

        assert_eq!(roles.get(&ClusterHostType::Master), Some(&set(&[1])));
        assert_eq!(roles.get(&ClusterHostType::Slave), Some(&set(&[0, 2])));
        assert!(!roles.contains_key(&ClusterHostType::Excluded));
    }

    #[test]
    fn test_sync_standby_ignores_lag() {
        let probes = [master("a:5432", &["c:5432"]), replica("b:5432", 1), replica("c:5432", 500)];
        let roles = classify(&probes, Some(Duration::from_secs(60))).unwrap();

        assert_eq!(roles.get(&ClusterHostType::SyncSlave), Some(&set(&[2])));
        assert_eq!(roles.get(&ClusterHostType::Slave), Some(&set(&[1])));
    }

    #[test]
    fn test_unreachable_and_unknown_lag() {
        let probes = [
            master("a:5432", &[]),
            HostProbe::new("b:5432", HostState::Unreachable),
            HostProbe::new("c:5432", HostState::Replica { lag: None }),
        ];
        let roles = classify(&probes, Some(Duration::from_secs(1))).unwrap();

        assert_eq!(roles.get(&ClusterHostType::Excluded), Some(&set(&[1])));
        assert_eq!(roles.get(&ClusterHostType::Slave), Some(&set(&[2])));
    }

    #[test]
    fn test_master_count_must_be_one() {
        let split_brain = [master("a:5432", &[]), master("b:5432", &[])];
        assert!(matches!(
            classify(&split_brain, None),
            Err(TopologyError::Inconsistent { masters: 2 })
        ));

        let headless = [replica("a:5432", 0), HostProbe::new("b:5432", HostState::Unreachable)];
        assert!(matches!(
            classify(&headless, None),
            Err(TopologyError::Inconsistent { masters: 0 })
        ));
    }

    fn host_state() -> impl Strategy<Value = HostState> {
        prop_oneof![
            Just(HostState::Unreachable),
            Just(HostState::Master {
                sync_standbys: Vec::new()
            }),
            proptest::option::of(0u64..300)
                .prop_map(|lag| HostState::Replica {
                    lag: lag.map(Duration::from_secs)
                }),
        ]
    }

    proptest! {
        #[test]
        fn every_host_gets_exactly_one_role(
            states in proptest::collection::vec(host_state(), 1..12),
            max_lag in proptest::option::of(0u64..120),
        ) {
            let probes: Vec<HostProbe> = states
                .into_iter()
                .enumerate()
                .map(|(i, state)| HostProbe::new(format!("h{i}:5432"), state))
                .collect();
            let max_lag = max_lag.map(Duration::from_secs);

            match classify(&probes, max_lag) {
                Ok(roles) => {
                    let mut seen = BTreeSet::new();
                    for indices in roles.values() {
                        prop_assert!(!indices.is_empty());
                        for index in indices {
                            prop_assert!(seen.insert(*index));
                        }
                    }
                    prop_assert_eq!(seen.len(), probes.len());
                    prop_assert_eq!(roles.get(&ClusterHostType::Master).map(BTreeSet::len), Some(1));
                }
                Err(TopologyError::Inconsistent { masters }) => {
                    prop_assert_ne!(masters, 1);
                    let writable = probes
                        .iter()
                        .filter(|p| matches!(p.state, HostState::Master { .. }))
                        .count();
                    prop_assert_eq!(masters, writable);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
