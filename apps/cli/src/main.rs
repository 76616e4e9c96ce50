//! docharvest CLI: AI metadata enhancement for Markdown documentation.
//!
//! Loads Markdown pages, asks a completion provider for a summary, tags and
//! a category for each, and writes the results as JSON lines.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
