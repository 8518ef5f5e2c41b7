//! NoRMatic Core - Core abstractions shared by the connection pool and its transports
//!
//! This crate provides the fundamental types that the other NoRMatic crates
//! depend on. It defines:
//!
//! - `Transport` - Trait for a physical connection to the document store
//! - `ConnectionFactory` - Trait for opening new transports for a target
//! - `TargetDescriptor` - Parsed connection target (hosts, database, credentials)
//! - `NormaticError` - The error type shared across the workspace

mod error;
mod target;
mod transport;

pub use error::*;
pub use target::*;
pub use transport::*;
