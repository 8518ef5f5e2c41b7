//! Command-line arguments and configuration layering

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use normatic_pool::{BackoffStrategy, PoolConfig, RetryPolicy};

#[derive(Debug, Parser)]
#[command(
    name = "normatic",
    version,
    about = "Probe document-store targets through a NoRMatic connection pool"
)]
pub struct Cli {
    /// Pool configuration file (TOML)
    #[arg(long, global = true, env = "NORMATIC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub pool: PoolOverrides,

    /// Also write JSON logs to a daily-rolling file
    #[arg(long, global = true, env = "NORMATIC_LOG_JSON")]
    pub log_json: bool,

    /// Directory for JSON log files
    #[arg(long, global = true, env = "NORMATIC_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Pool settings that override the configuration file
#[derive(Debug, Default, Args)]
pub struct PoolOverrides {
    /// Idle connections kept per target after a reclaim pass
    #[arg(long, global = true, env = "NORMATIC_MAX_FREE_CONNECTIONS")]
    pub max_free_connections: Option<usize>,

    /// Grace period before a checkout may be reclaimed
    #[arg(long, global = true, env = "NORMATIC_MIN_CHECKOUT_AGE_MS")]
    pub min_checkout_age_ms: Option<u64>,

    /// Idle time after which a connection is destroyed
    #[arg(long, global = true, env = "NORMATIC_MAX_IDLE_AGE_MS")]
    pub max_idle_age_ms: Option<u64>,

    /// Lifetime after which a connection is retired
    #[arg(long, global = true, env = "NORMATIC_MAX_LIFETIME_MS")]
    pub max_lifetime_ms: Option<u64>,

    /// Timeout for opening a connection
    #[arg(long, global = true, env = "NORMATIC_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Connections opened at once when a target has none idle
    #[arg(long, global = true, env = "NORMATIC_WARM_BATCH")]
    pub warm_batch: Option<usize>,
}

impl PoolOverrides {
    pub fn apply(&self, mut config: PoolConfig) -> PoolConfig {
        if let Some(count) = self.max_free_connections {
            config = config.with_max_free_connections(count);
        }
        if let Some(age) = self.min_checkout_age_ms {
            config = config.with_min_checkout_age_ms(age);
        }
        if let Some(age) = self.max_idle_age_ms {
            config = config.with_max_idle_age_ms(age);
        }
        if let Some(lifetime) = self.max_lifetime_ms {
            config = config.with_max_lifetime_ms(lifetime);
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config = config.with_connect_timeout_ms(timeout);
        }
        if let Some(batch) = self.warm_batch {
            config = config.with_warm_batch(batch);
        }
        config
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check out connections to a target and report pool state
    Probe(ProbeArgs),

    /// Print the effective pool configuration
    Config {
        #[arg(long, value_enum, default_value_t = ConfigFormat::Toml)]
        format: ConfigFormat,
    },
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Target descriptor, e.g. mongodb://localhost:27017/orders
    pub target: String,

    /// Number of connections to check out
    #[arg(short = 'n', long, default_value_t = 1)]
    pub connections: usize,

    /// Release the connections before the reclaim pass
    #[arg(long)]
    pub release: bool,

    /// Retries per connection when the target is unavailable
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Initial retry delay
    #[arg(long, default_value_t = 100)]
    pub retry_delay_ms: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl ProbeArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries,
            BackoffStrategy::new(self.retry_delay_ms, 10_000).with_jitter(true),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("normatic").join("pool.toml"))
}

/// Resolve the pool configuration: defaults, then file, then overrides
pub fn resolve_config(
    explicit: Option<&Path>,
    fallback: Option<&Path>,
    overrides: &PoolOverrides,
) -> anyhow::Result<PoolConfig> {
    let base = match (explicit, fallback) {
        (Some(path), _) => PoolConfig::load(path)
            .with_context(|| format!("failed to load pool config from {}", path.display()))?,
        (None, Some(path)) if path.exists() => PoolConfig::load(path)
            .with_context(|| format!("failed to load pool config from {}", path.display()))?,
        _ => PoolConfig::default(),
    };

    let config = overrides.apply(base);
    config.validate().context("invalid pool configuration")?;
    Ok(config)
}
