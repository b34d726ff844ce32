//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Belle - puzzle hunt bot
#[derive(Parser, Debug)]
#[command(name = "belle")]
#[command(version)]
#[command(about = "Keeps a chat server's channels and roles in sync with a puzzle hunt document")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot and its web API (default)
    Run,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

impl Cli {
    /// The subcommand to run, `run` when none was given.
    #[must_use]
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
