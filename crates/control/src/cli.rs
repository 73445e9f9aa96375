//! CLI surface (spec §6): `serve`, `mcp`, `migrate`, `version`.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "meridian-control", version, about = "Meridian fleet control plane")]
pub struct Cli {
    /// Path to a YAML config file layered under defaults and env vars.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the control plane: HTTP API, campaign engine tick loop,
    /// offline sweeper, and audit flusher.
    Serve,
    /// Run the Model Context Protocol surface (out of scope for this
    /// repo's design contribution — stubbed per spec §1's Non-goals).
    Mcp,
    /// Apply the baseline schema to the configured database.
    Migrate,
    /// Print the build version and exit.
    Version,
}
