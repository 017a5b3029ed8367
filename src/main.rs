mod cleaner;
mod cli;
mod error;
mod index;
mod models;
mod output;
mod policy;
mod registry;
mod settings;
mod token;

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use cleaner::Cleaner;
use cli::Cli;
use output::print_summary;
use registry::RegistryClient;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Configuration conflicts are reported before any network I/O
    let config = settings::resolve(&cli).context("Invalid configuration")?;
    tracing::debug!("Policy: {:?}", config.policy);

    let client = RegistryClient::new(
        config.endpoints.clone(),
        config.credentials.clone(),
        config.policy.dry_run,
        config.insecure_tls,
    )
    .context("Failed to build HTTP client")?;

    let cleaner = Cleaner::new(&client, &config.policy);
    let summary = cleaner
        .run(&config.repositories)
        .await
        .context("Cleanup aborted")?;

    print_summary(&summary, config.policy.dry_run);

    if summary.failed_repos() > 0 {
        process::exit(1);
    }

    Ok(())
}
