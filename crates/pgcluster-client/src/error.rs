//! Client-level error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a connection or while configuring one.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Establishing the session failed (network, authentication, handshake).
    #[error("failed to connect to {dsn}: {reason}")]
    ConnectionFailed {
        /// Masked DSN of the endpoint.
        dsn: String,
        /// Failure description from the driver.
        reason: String,
    },

    /// The server closed the session or the socket broke mid-operation.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A statement exceeded its timeout.
    #[error("statement timed out after {0:?}")]
    StatementTimeout(Duration),

    /// Session establishment exceeded the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The server rejected a statement.
    #[error("query failed: {0}")]
    Query(String),

    /// Protocol violation or unexpected server reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid connection string or connection settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error leaves the session unusable.
    ///
    /// Query errors and statement timeouts keep the session alive; everything
    /// else means the connection must be discarded.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Self::Query(_) | Self::StatementTimeout(_))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::ConnectionLost("reset by peer".into()).is_connection_error());
        assert!(Error::Protocol("bad message".into()).is_connection_error());
        assert!(!Error::Query("syntax error".into()).is_connection_error());
        assert!(!Error::StatementTimeout(Duration::from_secs(1)).is_connection_error());
    }
}
