//! Connection pooling for document-store connections
//!
//! This module provides a per-target pool with LIFO idle reuse, on-demand
//! creation, and a synchronous reclaim pass that returns free checkouts to
//! idle and destroys dead, expired or surplus idle connections.
//!
//! # Example
//!
//! ```ignore
//! use normatic_pool::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(5)
//!     .with_min_checkout_age_ms(250)
//!     .with_max_idle_age_ms(60_000);
//!
//! let pool = ConnectionPool::new(config, connection_factory);
//! let conn = pool.acquire("mongodb://localhost/orders").await?;
//! // Use conn.underlying()...
//! pool.release(&conn).await;
//! ```

mod config;
mod handle;
#[allow(clippy::module_inception)]
mod pool;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use handle::{ConnectionHandle, HandleState};
pub use pool::{ConnectionPool, ReclaimReport, ReleaseOutcome};
pub use stats::PoolStats;
