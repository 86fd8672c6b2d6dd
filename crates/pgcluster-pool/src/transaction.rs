//! Transaction and session handles bound to a pooled connection.

use std::time::Duration;

use pgcluster_client::{CommandControl, TransactionOptions};
use tokio::time::Instant;

use crate::error::PoolError;
use crate::pool::PooledConnection;

/// A running transaction.
///
/// The command control is resolved once at `begin` and used for every
/// statement, so later changes to the pool default do not affect it.
///
/// Dropping a transaction without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) rolls it back in the background; without a
/// runtime the connection is discarded instead.
#[derive(Debug)]
pub struct Transaction {
    conn: Option<PooledConnection>,
    options: TransactionOptions,
    cc: CommandControl,
    started_at: Instant,
}

impl Transaction {
    pub(crate) async fn begin(
        mut conn: PooledConnection,
        options: TransactionOptions,
        cc: CommandControl,
    ) -> Result<Self, PoolError> {
        if let Err(error) = conn.begin(&options, &cc).await {
            tracing::warn!(
                connection_id = conn.id(),
                error = %error,
                "failed to start transaction, discarding connection"
            );
            conn.mark_broken();
            return Err(error.into());
        }

        tracing::trace!(connection_id = conn.id(), "transaction started");
        Ok(Self {
            conn: Some(conn),
            options,
            cc,
            started_at: Instant::now(),
        })
    }

    /// Command control in effect for this transaction.
    #[must_use]
    pub fn command_control(&self) -> &CommandControl {
        &self.cc
    }

    /// Options the transaction was started with.
    #[must_use]
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Time since `BEGIN`.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Execute a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str) -> Result<u64, PoolError> {
        let conn = self.conn.as_mut().ok_or(PoolError::PoolClosed)?;
        Ok(conn.execute(sql, &self.cc).await?)
    }

    /// Commit and return the connection to the pool.
    pub async fn commit(mut self) -> Result<(), PoolError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = conn.commit(&self.cc).await;
        finish(&mut conn, result, "commit")
    }

    /// Roll back and return the connection to the pool.
    pub async fn rollback(mut self) -> Result<(), PoolError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = conn.rollback(&self.cc).await;
        finish(&mut conn, result, "rollback")
    }
}

fn finish(
    conn: &mut PooledConnection,
    result: pgcluster_client::Result<()>,
    action: &'static str,
) -> Result<(), PoolError> {
    if let Err(error) = &result {
        tracing::warn!(connection_id = conn.id(), action, error = %error, "transaction end failed");
        if error.is_connection_error() {
            conn.mark_broken();
        }
    }
    result.map_err(PoolError::from)
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        tracing::warn!(
            connection_id = conn.id(),
            "transaction dropped without commit or rollback, rolling back"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let cc = self.cc;
                handle.spawn(async move {
                    if conn.rollback(&cc).await.is_err() {
                        conn.mark_broken();
                    }
                });
            }
            Err(_) => conn.mark_broken(),
        }
    }
}

/// A connection used outside a transaction.
///
/// Returned to the pool when dropped.
#[derive(Debug)]
pub struct NonTransaction {
    conn: PooledConnection,
    cc: CommandControl,
}

impl NonTransaction {
    pub(crate) fn new(conn: PooledConnection, cc: CommandControl) -> Self {
        Self { conn, cc }
    }

    /// Use a different command control for the following statements.
    #[must_use]
    pub fn with_command_control(mut self, cc: CommandControl) -> Self {
        self.cc = cc;
        self
    }

    /// Command control in effect.
    #[must_use]
    pub fn command_control(&self) -> &CommandControl {
        &self.cc
    }

    /// Execute a single statement in autocommit mode.
    pub async fn execute(&mut self, sql: &str) -> Result<u64, PoolError> {
        Ok(self.conn.execute(sql, &self.cc).await?)
    }

    /// Whether the server is a read-only standby.
    pub async fn is_read_only(&mut self) -> Result<bool, PoolError> {
        Ok(self.conn.is_read_only(&self.cc).await?)
    }

    /// Replication lag of a standby, `None` on a master or when unknown.
    pub async fn replication_lag(&mut self) -> Result<Option<Duration>, PoolError> {
        Ok(self.conn.replication_lag(&self.cc).await?)
    }

    /// `host:port` of the standbys a master treats as synchronous.
    pub async fn synchronous_standbys(&mut self) -> Result<Vec<String>, PoolError> {
        Ok(self.conn.synchronous_standbys(&self.cc).await?)
    }

    /// Discard the connection instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.conn.mark_broken();
    }
}
