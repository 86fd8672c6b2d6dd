//! Transaction options.

use crate::command_control::CommandControl;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed (PostgreSQL default).
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
    /// Read uncommitted (behaves as read committed on PostgreSQL).
    ReadUncommitted,
}

impl IsolationLevel {
    /// SQL spelling of the level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::ReadUncommitted => "READ UNCOMMITTED",
        }
    }
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Read-write transaction.
    #[default]
    ReadWrite,
    /// Read-only transaction.
    ReadOnly,
    /// Read-only deferrable transaction (serializable snapshots only).
    Deferrable,
}

/// Options used to start a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Isolation level.
    pub isolation_level: IsolationLevel,
    /// Access mode.
    pub mode: TransactionMode,
    /// Per-call command control. Sits between an explicit override passed to
    /// `begin` and the pool default.
    pub command_control: Option<CommandControl>,
}

impl TransactionOptions {
    /// Read-committed read-write transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only transaction with default isolation.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            mode: TransactionMode::ReadOnly,
            ..Self::default()
        }
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set the per-call command control.
    #[must_use]
    pub fn command_control(mut self, cc: CommandControl) -> Self {
        self.command_control = Some(cc);
        self
    }

    /// The `BEGIN` statement for these options.
    #[must_use]
    pub fn begin_statement(&self) -> String {
        let mut sql = String::from("BEGIN");
        if self.isolation_level != IsolationLevel::ReadCommitted {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(self.isolation_level.as_sql());
        }
        match self.mode {
            TransactionMode::ReadWrite => {}
            TransactionMode::ReadOnly => sql.push_str(" READ ONLY"),
            TransactionMode::Deferrable => sql.push_str(" READ ONLY DEFERRABLE"),
        }
        sql
    }

    /// Whether the transaction may write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode != TransactionMode::ReadWrite
    }
}
