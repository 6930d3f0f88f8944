//! Binary entry point for the snapwarden CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{ArgGroup, Parser};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snapwarden::{
    ApiError, AppConfig, ConfigError, SnapshotCleaner, SnapshotCreator, YandexCompute,
};

#[derive(Debug, Parser)]
#[command(
    name = "snapwarden",
    version,
    about = "Create and prune boot-disk snapshots for configured cloud instances",
    group = ArgGroup::new("mode").required(true)
)]
struct Cli {
    /// Create snapshots for the configured instances.
    #[arg(short, long, group = "mode")]
    create: bool,
    /// Delete expired snapshots for the configured instances.
    #[arg(short, long, group = "mode")]
    delete: bool,
    /// Delete expired snapshots, then create fresh ones.
    #[arg(short, long, group = "mode")]
    full: bool,
    /// Fan each workflow out as one concurrent task per instance.
    #[arg(long)]
    run_async: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("compute API error: {0}")]
    Api(#[from] ApiError),
    #[error("instance list is empty; add instance ids to the configuration")]
    NoInstances,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
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

async fn run(cli: Cli) -> Result<(), CliError> {
    let started = Instant::now();

    let config = AppConfig::load_without_cli_args()?;
    config.validate()?;
    let instances = config.instances();
    if instances.is_empty() {
        warn!(
            "instance list is empty; add instance ids (space separated if multiple) \
             to the configuration"
        );
        return Err(CliError::NoInstances);
    }

    let api = Arc::new(YandexCompute::connect(&config.oauth_token).await?);
    let creator = SnapshotCreator::new(Arc::clone(&api));
    let cleaner = SnapshotCleaner::new(Arc::clone(&api), config.retention_policy()?);

    if cli.delete || cli.full {
        if cli.run_async {
            cleaner.run_concurrent(&instances).await;
        } else {
            cleaner.run_sequential(&instances).await;
        }
    }

    if cli.create || cli.full {
        if cli.run_async {
            creator.run_concurrent(&instances).await;
        } else {
            creator.run_sequential(&instances).await;
        }
        creator.report_status_all(&instances).await;
    }

    info!(elapsed = %human_elapsed(started.elapsed()), "run finished");
    Ok(())
}

/// Renders a duration as its two largest named units, e.g. "2 minutes,
/// 5 seconds".
fn human_elapsed(elapsed: Duration) -> String {
    const INTERVALS: [(&str, u64); 4] =
        [("day", 86_400), ("hour", 3_600), ("minute", 60), ("second", 1)];

    let mut seconds = elapsed.as_secs();
    let mut parts = Vec::new();
    for (name, count) in INTERVALS {
        let value = seconds / count;
        if value > 0 {
            seconds -= value * count;
            let plural = if value == 1 { "" } else { "s" };
            parts.push(format!("{value} {name}{plural}"));
        }
    }
    if parts.is_empty() {
        return String::from("0 seconds");
    }
    parts.truncate(2);
    parts.join(", ")
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
