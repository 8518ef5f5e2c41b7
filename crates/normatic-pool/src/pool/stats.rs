//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Statistics about a target's (or the whole pool's) current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of idle connections available for reuse
    idle: usize,
    /// Number of connections currently checked out
    in_use: usize,
    /// Connections opened over the pool's lifetime
    created: u64,
    /// Connections destroyed over the pool's lifetime
    destroyed: u64,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(idle: usize, in_use: usize, created: u64, destroyed: u64) -> Self {
        Self {
            idle,
            in_use,
            created,
            destroyed,
        }
    }

    /// Get the number of live connections (idle + in use)
    pub fn total(&self) -> usize {
        self.idle + self.in_use
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of checked-out connections
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Get the number of connections ever opened
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Get the number of connections ever destroyed
    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total() as f64
        }
    }

    /// Check if every live connection is checked out
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total() > 0
    }

    /// Combine the statistics of two targets
    pub fn merge(self, other: PoolStats) -> PoolStats {
        PoolStats {
            idle: self.idle + other.idle,
            in_use: self.in_use + other.in_use,
            created: self.created + other.created,
            destroyed: self.destroyed + other.destroyed,
        }
    }
}
