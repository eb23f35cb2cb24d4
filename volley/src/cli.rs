use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "volley", version, about = "Load testing toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test script.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the YAML script.
    pub script: PathBuf,

    /// Override the script's target URL.
    #[arg(long)]
    pub target: Option<String>,

    /// Reporting interval (e.g. 10s).
    #[arg(long, value_parser = humantime::parse_duration)]
    pub stats_interval: Option<Duration>,

    /// Print the final report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Suppress periodic progress output.
    #[arg(long, short)]
    pub quiet: bool,
}
