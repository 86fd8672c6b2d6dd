//! Topology configuration.

use std::time::Duration;

use crate::error::TopologyError;

/// How the topology tracker probes the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologySettings {
    /// Replicas lagging further behind than this are excluded.
    ///
    /// `None` or zero disables lag filtering: every reachable replica
    /// qualifies.
    pub max_replication_lag: Option<Duration>,

    /// Time between probe rounds.
    pub probe_interval: Duration,

    /// Bound on one probe round, including connecting to a host.
    pub probe_timeout: Duration,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            max_replication_lag: Some(Duration::from_secs(60)),
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
        }
    }
}

impl TopologySettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum replication lag. Zero disables lag filtering.
    #[must_use]
    pub fn max_replication_lag(mut self, lag: Duration) -> Self {
        self.max_replication_lag = Some(lag);
        self
    }

    /// Accept replicas regardless of lag.
    #[must_use]
    pub fn without_lag_limit(mut self) -> Self {
        self.max_replication_lag = None;
        self
    }

    /// Set the time between probe rounds.
    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the per-round probe timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// The effective lag limit, `None` when filtering is disabled.
    #[must_use]
    pub fn lag_limit(&self) -> Option<Duration> {
        self.max_replication_lag.filter(|lag| !lag.is_zero())
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.probe_interval.is_zero() {
            return Err(TopologyError::Configuration(
                "probe_interval must be positive".into(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(TopologyError::Configuration(
                "probe_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_lag_disables_filtering() {
        let settings = TopologySettings::new().max_replication_lag(Duration::ZERO);
        assert_eq!(settings.lag_limit(), None);
        assert_eq!(TopologySettings::new().without_lag_limit().lag_limit(), None);
        assert_eq!(
            TopologySettings::default().lag_limit(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_validate() {
        assert!(TopologySettings::default().validate().is_ok());
        assert!(
            TopologySettings::new()
                .probe_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            TopologySettings::new()
                .probe_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
