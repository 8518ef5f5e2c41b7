//! `normatic` - probe document-store targets through a connection pool

mod args;
mod logging;
mod output;
mod probe;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use normatic_pool::NormaticError;

use args::{Cli, Command, ConfigFormat, OutputFormat};
use logging::LoggingConfig;

/// Exit status when the target could not be reached
const EXIT_UNAVAILABLE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::for_verbosity(cli.verbose);
    if cli.log_json {
        logging = logging.with_json_logs(cli.log_dir.clone());
    }
    let _guard = match logging::init(logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: logging disabled: {:#}", e);
            None
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "command failed");
            eprintln!("error: {:#}", err);
            if is_unavailable(&err) {
                ExitCode::from(EXIT_UNAVAILABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let fallback = args::default_config_path();
    let config = args::resolve_config(cli.config.as_deref(), fallback.as_deref(), &cli.pool)?;

    match cli.command {
        Command::Probe(probe_args) => {
            let report = probe::run(&probe_args, config).await?;
            let rendered = match probe_args.format {
                OutputFormat::Table => output::render_table(&report),
                OutputFormat::Json => output::render_json(&report)?,
            };
            println!("{}", rendered);
        }
        Command::Config { format } => {
            let rendered = match format {
                ConfigFormat::Toml => {
                    toml::to_string_pretty(&config).context("failed to render config")?
                }
                ConfigFormat::Json => {
                    serde_json::to_string_pretty(&config).context("failed to render config")?
                }
            };
            println!("{}", rendered);
        }
    }

    Ok(())
}

fn is_unavailable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<NormaticError>(),
            Some(NormaticError::ConnectionUnavailable { .. })
        )
    })
}
