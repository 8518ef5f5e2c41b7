//! Caller-side retry for connection acquisition
//!
//! The pool itself never retries a failed open. Callers that want to ride out
//! a restarting store wrap `acquire` with a [`RetryPolicy`] instead.
//!
//! # Example
//!
//! ```ignore
//! use normatic_pool::retry::{BackoffStrategy, RetryPolicy, acquire_with_retry};
//!
//! let policy = RetryPolicy::new(3, BackoffStrategy::new(100, 5_000));
//! let conn = acquire_with_retry(&pool, "mongodb://localhost/orders", &policy).await?;
//! ```

mod backoff;
mod policy;


pub use backoff::BackoffStrategy;
pub use policy::{RetryPolicy, acquire_with_retry};
