//! NoRMatic Pool - Connection pooling for the document store
//!
//! This crate owns connection reuse, health-based reclamation and the
//! caller-side retry helpers used by the data-access layer.

pub mod pool;
pub mod retry;

pub use normatic_core::{ConnectionFactory, NormaticError, Result, TargetDescriptor, Transport};
pub use pool::{
    ConnectionHandle, ConnectionPool, HandleState, PoolConfig, PoolStats, ReclaimReport,
    ReleaseOutcome,
};
pub use retry::{BackoffStrategy, RetryPolicy, acquire_with_retry};
