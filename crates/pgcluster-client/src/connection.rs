//! The connection-object seam.
//!
//! The wire protocol lives behind these traits. The pool owns boxed
//! [`Connection`]s and creates them through a shared [`Connector`]; tests plug
//! in an in-memory implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::command_control::{CommandControl, ConnectionSettings};
use crate::dsn::Dsn;
use crate::error::Result;
use crate::options::TransactionOptions;
use crate::statistics::ConnectionStatistics;

/// A live database session.
#[async_trait]
pub trait Connection: Send + fmt::Debug {
    /// Identifier unique within the process, used in logs.
    fn id(&self) -> u64;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, cc: &CommandControl) -> Result<u64>;

    /// Start a transaction.
    async fn begin(&mut self, options: &TransactionOptions, cc: &CommandControl) -> Result<()> {
        self.execute(&options.begin_statement(), cc).await.map(|_| ())
    }

    /// Commit the running transaction.
    async fn commit(&mut self, cc: &CommandControl) -> Result<()> {
        self.execute("COMMIT", cc).await.map(|_| ())
    }

    /// Roll back the running transaction.
    async fn rollback(&mut self, cc: &CommandControl) -> Result<()> {
        self.execute("ROLLBACK", cc).await.map(|_| ())
    }

    /// Whether the server only accepts reads (a hot standby).
    async fn is_read_only(&mut self, cc: &CommandControl) -> Result<bool>;

    /// Replication lag of a standby, `None` on a master or when unknown.
    async fn replication_lag(&mut self, cc: &CommandControl) -> Result<Option<Duration>>;

    /// `host:port` of the standbys a master currently treats as synchronous.
    async fn synchronous_standbys(&mut self, cc: &CommandControl) -> Result<Vec<String>>;

    /// Whether the session hit a connection-level error and must be dropped.
    fn is_broken(&self) -> bool;

    /// Whether the session is outside any transaction.
    fn is_idle(&self) -> bool;

    /// Drain the statistics gathered since the previous call.
    fn take_statistics(&mut self) -> ConnectionStatistics;

    /// Terminate the session.
    async fn close(self: Box<Self>);
}

/// Factory for sessions to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a session to `dsn`, applying `cc` as its default.
    async fn connect(
        &self,
        dsn: &Dsn,
        settings: &ConnectionSettings,
        cc: &CommandControl,
    ) -> Result<Box<dyn Connection>>;
}
