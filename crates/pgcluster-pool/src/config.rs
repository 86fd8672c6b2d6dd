//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Size limits of a connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connections opened when the pool is created.
    pub initial_size: usize,

    /// Hard cap on connections created but not yet destroyed.
    pub max_size: usize,

    /// Maximum number of callers waiting for a connection at once.
    pub max_queue_size: usize,

    /// Window over which recent connection errors are counted.
    pub recent_errors_window: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial_size: 1,
            max_size: 10,
            max_queue_size: 200,
            recent_errors_window: Duration::from_secs(60),
        }
    }
}

impl PoolSettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections opened at startup.
    #[must_use]
    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the connection cap.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the wait queue limit.
    #[must_use]
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the recent error window.
    #[must_use]
    pub fn recent_errors_window(mut self, window: Duration) -> Self {
        self.recent_errors_window = window;
        self
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }

        if self.initial_size > self.max_size {
            return Err(PoolError::Configuration(format!(
                "initial_size ({}) cannot exceed max_size ({})",
                self.initial_size, self.max_size
            )));
        }

        if self.recent_errors_window < crate::recent::EPOCH {
            return Err(PoolError::Configuration(format!(
                "recent_errors_window must be at least {:?}",
                crate::recent::EPOCH
            )));
        }

        Ok(())
    }
}
