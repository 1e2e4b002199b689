use std::ffi::OsString;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::parsers::parse_duration_arg;
use crate::error::{AppError, AppResult};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Provisions load-generating agents across cloud and data-center clusters, runs JMeter plans on them, and collects the results."
)]
pub struct FleetArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file (TOML or JSON, defaults to loadfleet.toml then loadfleet.json)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
}

impl FleetArgs {
    /// Parses `args` (program name first) without exiting the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Clap` for unknown flags, invalid values, or a
    /// help/version request.
    pub fn try_from_args<I, T>(args: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args).map_err(AppError::from)
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Set up clusters, generate load until the plans finish, then stop and collect results
    Run(RunArgs),
    /// Validate the config and print the clusters it describes
    Check,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunArgs {
    /// Upload plan files to every agent even when unchanged
    #[arg(long)]
    pub redeploy: bool,

    /// Set up clusters that are marked inactive as well
    #[arg(long)]
    pub force: bool,

    /// Abort the test after this long (supports ms/s/m/h)
    #[arg(long = "max-duration", value_parser = parse_duration_arg)]
    pub max_duration: Option<Duration>,

    /// Stop cloud instances once the test is over
    #[arg(long)]
    pub suspend: bool,

    /// Tear every cluster down after results are collected
    #[arg(long)]
    pub terminate: bool,
}
