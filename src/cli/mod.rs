//! Command-line interface definitions for the `spotlaunch` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Launch specification read when `--launch-spec` is not given.
pub(crate) const DEFAULT_LAUNCH_SPEC: &str = "launch_spec.json";

/// Top-level CLI for the `spotlaunch` binary.
#[derive(Debug, Parser)]
#[command(
    name = "spotlaunch",
    version,
    about = "Request EC2 spot instances and optionally wait until they are usable",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Submit a spot request and optionally wait for the instances.
    #[command(name = "launch", about = "Submit a spot request and optionally wait for the instances")]
    Launch(LaunchCommand),
    /// Print the request that `launch` would submit, without calling AWS.
    #[command(name = "plan", about = "Print the request that launch would submit, without calling AWS")]
    Plan(PlanCommand),
}

/// Inputs shared by `launch` and `plan`.
#[derive(Debug, Args)]
pub(crate) struct SpecArgs {
    /// Launch specification JSON document.
    #[arg(short = 'l', long = "launch-spec", value_name = "FILE", default_value = DEFAULT_LAUNCH_SPEC)]
    pub(crate) launch_spec: String,
    /// User-data file sent to the instances; overrides `USER_DATA_FILE_NAME`
    /// from the launch specification.
    #[arg(long, value_name = "FILE")]
    pub(crate) user_data: Option<String>,
}

/// Arguments for the `spotlaunch launch` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct LaunchCommand {
    #[command(flatten)]
    pub(crate) spec: SpecArgs,
    /// Wait until every spot request is fulfilled, then print
    /// `<instance-id> <ip>` lines.
    #[arg(long, conflicts_with = "full_wait")]
    pub(crate) wait: bool,
    /// Wait for fulfilment and for the instances to pass their status checks.
    #[arg(long)]
    pub(crate) full_wait: bool,
    /// Print private instead of public IP addresses.
    #[arg(long, visible_alias = "ppip")]
    pub(crate) private_ip: bool,
    /// Report progress on standard error.
    #[arg(short = 'p', long)]
    pub(crate) progress: bool,
}

/// Arguments for the `spotlaunch plan` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PlanCommand {
    #[command(flatten)]
    pub(crate) spec: SpecArgs,
}
