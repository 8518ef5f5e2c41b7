//! Logging setup for the `normatic` binary
//!
//! Console output goes to stderr so that `--format json` output on stdout
//! stays machine-readable. A daily-rolling JSON file can be enabled for bug
//! reports. `RUST_LOG` takes precedence over the configured filter.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where JSON log files are written
    pub log_dir: PathBuf,

    /// Whether to write JSON logs to a daily-rolling file
    pub enable_json_logs: bool,

    /// Whether to log to stderr
    pub enable_console_logs: bool,

    /// Whether to include file/line information in console logs
    pub include_location: bool,

    /// Whether to log span open/close events
    pub enable_spans: bool,

    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: false,
            enable_console_logs: true,
            include_location: false,
            enable_spans: false,
            default_filter: filter_for_verbosity(0),
        }
    }
}

impl LoggingConfig {
    /// Configuration for the given number of `-v` flags
    pub fn for_verbosity(verbose: u8) -> Self {
        Self {
            include_location: verbose >= 2,
            enable_spans: verbose >= 2,
            default_filter: filter_for_verbosity(verbose),
            ..Self::default()
        }
    }

    /// Enable the JSON file layer, optionally in a different directory
    pub fn with_json_logs(mut self, log_dir: Option<PathBuf>) -> Self {
        self.enable_json_logs = true;
        if let Some(dir) = log_dir {
            self.log_dir = dir;
        }
        self
    }
}

fn filter_for_verbosity(verbose: u8) -> String {
    match verbose {
        0 => "warn,normatic_pool=info,normatic_cli=info".to_string(),
        1 => "info,normatic_pool=debug,normatic_tcp=debug,normatic_cli=debug".to_string(),
        _ => "debug,normatic_pool=trace,normatic_tcp=trace".to_string(),
    }
}

/// Initialize the global subscriber
///
/// The returned guard flushes the JSON writer and must be held until exit.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(env_filter.clone())
            .boxed();

        layers.push(console_layer);
    }

    let mut guard = None;
    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "normatic.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();

        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );

    Ok(guard)
}

/// Default directory for JSON log files
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("normatic")
        .join("logs")
}
