//! Per-operation timeout and retry settings.

use std::time::Duration;

use crate::error::{Error, Result};

/// Timeouts and retry budget applied to a database operation.
///
/// A pool holds one default value; transactions may override it. The value
/// is resolved once when a transaction starts and stays fixed for its
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandControl {
    /// Server-side statement timeout.
    pub statement_timeout: Duration,
    /// Timeout for establishing a session and for network round-trips.
    pub connect_timeout: Duration,
    /// How many times the caller may retry the operation. The pool only
    /// carries this value; it never retries on its own.
    pub retries: u32,
}

impl Default for CommandControl {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            retries: 0,
        }
    }
}

impl CommandControl {
    /// Create a command control with the given timeouts and no retries.
    #[must_use]
    pub fn new(statement_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            statement_timeout,
            connect_timeout,
            retries: 0,
        }
    }

    /// Set the statement timeout.
    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Reject zero timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.statement_timeout.is_zero() {
            return Err(Error::Config("statement_timeout must be positive".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Optional override of the pool default.
pub type OptionalCommandControl = Option<CommandControl>;

/// Settings handed to the connector for every new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Application name reported to the server when the DSN does not set one.
    pub application_name: String,
    /// Whether the driver may cache prepared statements per session.
    pub prepared_statements: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            application_name: "pgcluster".to_string(),
            prepared_statements: true,
        }
    }
}
