//! Retry policy and the retrying acquire helper

use normatic_core::{NormaticError, Result};
use serde::{Deserialize, Serialize};

use super::BackoffStrategy;
use crate::pool::{ConnectionHandle, ConnectionPool};

/// How many times, and how patiently, to retry a failed acquire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail immediately)
    max_retries: u32,
    /// Backoff strategy for delays between retries
    backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, BackoffStrategy::default())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Whether an acquire failure is worth another attempt
    ///
    /// Only open failures are retried; a malformed target stays malformed.
    pub fn should_retry(&self, error: &NormaticError) -> bool {
        matches!(error, NormaticError::ConnectionUnavailable { .. })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}

/// Acquire a connection, retrying `ConnectionUnavailable` per `policy`
///
/// Returns the last error once the retries are exhausted.
#[tracing::instrument(skip_all, fields(max_retries = policy.max_retries()))]
pub async fn acquire_with_retry(
    pool: &ConnectionPool,
    target: &str,
    policy: &RetryPolicy,
) -> Result<ConnectionHandle> {
    let mut attempt = 0;
    loop {
        match pool.acquire(target).await {
            Ok(handle) => {
                if attempt > 0 {
                    tracing::info!(attempt, "acquired connection after retrying");
                }
                return Ok(handle);
            }
            Err(e) if attempt < policy.max_retries() && policy.should_retry(&e) => {
                let delay = policy.backoff().calculate_delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "acquire failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
