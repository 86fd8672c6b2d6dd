//! # pgcluster-pool
//!
//! Bounded connection pool for one database endpoint.
//!
//! ## Features
//!
//! - Hard `max_size` cap enforced through scoped [`SizeGuard`]s
//! - Lock-free free list with deadline-bounded waiting
//! - Background growth: a caller that finds no idle connection starts one
//!   connect and waits for whichever connection is released first
//! - Wait queue limit for backpressure
//! - Default [`CommandControl`](pgcluster_client::CommandControl) swapped
//!   atomically, resolved once per transaction
//! - Recent connection error counter and per-pool metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgcluster_pool::{Pool, PoolSettings};
//! use tokio::time::{Duration, Instant};
//!
//! let pool = Pool::builder(dsn, connector)
//!     .settings(PoolSettings::new().initial_size(5).max_size(20))
//!     .build()
//!     .await?;
//!
//! let deadline = Instant::now() + Duration::from_millis(200);
//! let mut session = pool.start(deadline).await?;
//! session.execute("SELECT 1").await?;
//! drop(session); // back to the pool
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;
pub mod rcu;
pub mod recent;
pub mod size_guard;
pub mod statistics;
pub mod transaction;

// Configuration
pub use config::PoolSettings;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolBuilder, PooledConnection};
pub use statistics::{PoolMetrics, PoolStatus};
pub use transaction::{NonTransaction, Transaction};

// Building blocks
pub use recent::RecentCounter;
pub use size_guard::SizeGuard;
