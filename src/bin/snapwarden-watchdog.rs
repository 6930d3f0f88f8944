//! Standalone watchdog binary that restarts configured instances found
//! stopped.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use snapwarden::{ApiError, AppConfig, ConfigError, Watchdog, YandexCompute};

#[derive(Debug, Parser)]
#[command(
    name = "snapwarden-watchdog",
    version,
    about = "Poll configured instances and restart any found stopped"
)]
struct Cli {}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("compute API error: {0}")]
    Api(#[from] ApiError),
    #[error("target list is empty; add target ids to the configuration")]
    NoTargets,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let _cli = Cli::parse();
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            writeln!(io::stderr(), "{err}").ok();
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run() -> Result<(), CliError> {
    let config = AppConfig::load_without_cli_args()?;
    config.validate()?;
    let targets = config.targets();
    if targets.is_empty() {
        warn!(
            "target list is empty; add target ids (space separated if multiple) \
             to the configuration"
        );
        return Err(CliError::NoTargets);
    }

    let api = Arc::new(YandexCompute::connect(&config.oauth_token).await?);
    Watchdog::new(api)
        .with_delay(config.watchdog_delay())
        .run(&targets)
        .await;
    Ok(())
}
