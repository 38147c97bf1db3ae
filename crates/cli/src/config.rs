//! Top-level CLI configuration.

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use crate::commands::Command;

/// Connect to servers that cannot be reached by having them connect back.
#[derive(Parser, Debug)]
#[command(name = "dialback", version)]
pub struct CliConfig {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Installs logging and runs the selected command to completion.
    pub fn run(self) -> anyhow::Result<()> {
        // logs go to stderr, stdout carries requests and payload
        tracing_subscriber::fmt()
            .with_max_level(self.log_level)
            .with_writer(std::io::stderr)
            .init();

        let runtime = tokio::runtime::Runtime::new().context("unable to start runtime")?;
        runtime.block_on(self.command.execute())
    }
}
