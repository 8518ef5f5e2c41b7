//! Plain TCP transport for NoRMatic
//!
//! This crate opens raw TCP connections to the hosts named in a target
//! descriptor and hands them to the pool as [`normatic_core::Transport`]s.
//! It does not speak the wire protocol; callers reach the socket through
//! [`TcpTransport::with_stream`].
//!
//! # Example
//!
//! ```ignore
//! use normatic_pool::{ConnectionPool, PoolConfig};
//! use normatic_tcp::TcpConnectionFactory;
//!
//! let pool = ConnectionPool::new(PoolConfig::default(), TcpConnectionFactory::new());
//! let conn = pool.acquire("mongodb://localhost:27017/orders").await?;
//! ```

mod driver;
#[cfg(test)]
mod driver_tests;

pub use driver::*;
