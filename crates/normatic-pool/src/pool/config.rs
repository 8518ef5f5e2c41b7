//! Pool configuration types

use std::path::Path;
use std::time::Duration;

use normatic_core::{NormaticError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls idle retention and connection aging. The pool is unbounded on
/// demand; these settings only bound what it keeps warm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections retained per target after a reclaim pass
    max_free_connections: usize,
    /// Grace period in milliseconds before a checked-out connection may be reclaimed
    min_checkout_age_ms: u64,
    /// Milliseconds an idle connection may sit unused before it is destroyed
    max_idle_age_ms: u64,
    /// Maximum lifetime of a connection in milliseconds, measured from creation
    #[serde(skip_serializing_if = "Option::is_none")]
    max_lifetime_ms: Option<u64>,
    /// Timeout in milliseconds for opening a new connection
    connect_timeout_ms: u64,
    /// Connections opened together when an acquire finds idle empty; the
    /// extras go to idle, up to `max_free_connections`
    warm_batch: usize,
}

impl PoolConfig {
    /// Create a new pool configuration retaining at most `max_free_connections`
    /// idle connections per target
    pub fn new(max_free_connections: usize) -> Self {
        Self {
            max_free_connections,
            min_checkout_age_ms: 300,   // 300 milliseconds default
            max_idle_age_ms: 120_000,   // 2 minutes default
            max_lifetime_ms: None,
            connect_timeout_ms: 10_000, // 10 seconds default
            warm_batch: 1,
        }
    }

    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| NormaticError::Configuration(format!("invalid pool config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading pool configuration");
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check that the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(NormaticError::Configuration(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_idle_age_ms == 0 {
            return Err(NormaticError::Configuration(
                "max_idle_age_ms must be greater than 0".into(),
            ));
        }
        if self.warm_batch == 0 {
            return Err(NormaticError::Configuration(
                "warm_batch must be at least 1".into(),
            ));
        }
        if self.max_lifetime_ms == Some(0) {
            return Err(NormaticError::Configuration(
                "max_lifetime_ms must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Set the number of idle connections retained per target
    pub fn with_max_free_connections(mut self, count: usize) -> Self {
        self.max_free_connections = count;
        self
    }

    /// Set the checkout grace period in milliseconds
    pub fn with_min_checkout_age_ms(mut self, age_ms: u64) -> Self {
        self.min_checkout_age_ms = age_ms;
        self
    }

    /// Set the idle age ceiling in milliseconds
    pub fn with_max_idle_age_ms(mut self, age_ms: u64) -> Self {
        self.max_idle_age_ms = age_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Set the connect timeout in milliseconds
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Set how many connections an acquire opens when idle is empty
    pub fn with_warm_batch(mut self, batch: usize) -> Self {
        self.warm_batch = batch;
        self
    }

    /// Get the idle retention ceiling
    pub fn max_free_connections(&self) -> usize {
        self.max_free_connections
    }

    /// Get the checkout grace period as a Duration
    pub fn min_checkout_age(&self) -> Duration {
        Duration::from_millis(self.min_checkout_age_ms)
    }

    /// Get the idle age ceiling as a Duration
    pub fn max_idle_age(&self) -> Duration {
        Duration::from_millis(self.max_idle_age_ms)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    /// Get the connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the warm-up batch size
    pub fn warm_batch(&self) -> usize {
        self.warm_batch
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - max_free_connections: 3
    /// - min_checkout_age: 300 milliseconds
    /// - max_idle_age: 2 minutes
    /// - max_lifetime: None
    /// - connect_timeout: 10 seconds
    /// - warm_batch: 1
    fn default() -> Self {
        Self::new(3)
    }
}
