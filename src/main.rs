use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::process;
use std::sync::Mutex;
use talosmon::cli::{commands, Cli};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.command.is_none() {
        eprintln!("No command specified. Use --help for usage information.");
        process::exit(1);
    }

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }

    info!("Starting talosmon v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = commands::handle_command(cli).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Line-oriented log to a local file; the terminal stays free for output.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file = File::create(&cli.log_file)
        .with_context(|| format!("failed to open debug log file {}", cli.log_file.display()))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
