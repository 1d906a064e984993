//! chatsync - command-line driver for the message sync engine

use anyhow::Context;
use chatsync_cli::{Cli, CliAppConfig, CommandDispatcher};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = CliAppConfig::resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;

    CommandDispatcher::execute(cli, config).await?;
    Ok(())
}

/// Log to stderr so console and report output stay clean
fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
