// ABOUTME: CLI entry point for dbslice
// ABOUTME: Parses commands and routes to the cli module's per-command handlers

use clap::Parser;
use dbslice::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dbslice::cli::run(cli).await
}
