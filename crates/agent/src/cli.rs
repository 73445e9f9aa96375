//! CLI surface: `run`, `enroll`, `version`.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "meridian-agent", version, about = "Meridian fleet agent")]
pub struct Cli {
    /// Path to a YAML config file layered under defaults and env vars.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Enrol if needed, then run the tunnel client, workflow executor,
    /// result reporter, and health monitor until terminated.
    Run,
    /// Enrol against the control plane and persist the resulting
    /// identity, without starting the tunnel.
    Enroll {
        /// Installation key issued by the control plane operator.
        #[arg(long)]
        installation_key: String,
    },
    /// Print the build version and exit.
    Version,
}
