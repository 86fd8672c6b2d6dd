//! # pgcluster-client
//!
//! The connection interface shared by the pgcluster pool and topology
//! crates.
//!
//! This crate does not speak the wire protocol. It defines what the pool
//! needs from a driver:
//!
//! - [`Connection`] and [`Connector`]: the session and its factory
//! - [`Dsn`]: key/value connection strings, host splitting, password masking
//! - [`CommandControl`]: statement/connect timeouts and retry budget
//! - [`TransactionOptions`]: isolation level and access mode
//! - [`ConnectionStatistics`]: counters drained on every release
//!
//! ## Example
//!
//! ```rust
//! use pgcluster_client::{Dsn, split_by_host};
//!
//! let dsn = Dsn::parse("host=db1,db2 port=5432 dbname=orders password=secret")?;
//! let hosts: Vec<String> = split_by_host(&dsn).iter().map(Dsn::host_id).collect();
//! assert_eq!(hosts, ["db1:5432", "db2:5432"]);
//! assert!(!dsn.masked().contains("secret"));
//! # Ok::<(), pgcluster_client::Error>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod command_control;
pub mod connection;
pub mod dsn;
pub mod error;
pub mod options;
pub mod statistics;

pub use command_control::{CommandControl, ConnectionSettings, OptionalCommandControl};
pub use connection::{Connection, Connector};
pub use dsn::{Dsn, split_by_host};
pub use error::{Error, Result};
pub use options::{IsolationLevel, TransactionMode, TransactionOptions};
pub use statistics::ConnectionStatistics;
