//! Binary entry point for the spotlaunch CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use spotlaunch::{
    AddressKind, AwsCliProvider, AwsError, ConfigError, CredentialRegionConfig, EXIT_FAILURE,
    EncodingError, LaunchController, LaunchError, LaunchOutcome, LaunchSpec, LauncherConfig,
    RegionZoneDecision, RunMode, SpotSubmission, UserData, region, spawn_interrupt_listener,
};

mod cli;

use cli::{Cli, LaunchCommand, PlanCommand, SpecArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("user data error: {0}")]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Launch(#[from] LaunchError<AwsError>),
    #[error("failed to render request: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Launch(err) => err.exit_code(),
            _ => EXIT_FAILURE,
        }
    }
}

/// Everything a launch needs, assembled before any provider call.
#[derive(Debug)]
struct Prepared {
    settings: LauncherConfig,
    decision: RegionZoneDecision,
    submission: SpotSubmission,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(matches!(&cli, Cli::Launch(command) if command.progress));

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };
    process::exit(exit_code);
}

fn init_tracing(progress: bool) {
    let fallback = if progress { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Launch(command) => run_launch(command).await,
        Cli::Plan(command) => run_plan(&command),
    }
}

fn run_plan(command: &PlanCommand) -> Result<(), CliError> {
    let prepared = prepare(&command.spec)?;
    let document = prepared.submission.plan_document(&prepared.decision)?;
    let rendered = serde_json::to_string_pretty(&document)?;
    writeln!(io::stdout(), "{rendered}")?;
    Ok(())
}

async fn run_launch(command: LaunchCommand) -> Result<(), CliError> {
    let prepared = prepare(&command.spec)?;
    let mode = run_mode(&command);
    let address = if command.private_ip {
        AddressKind::Private
    } else {
        AddressKind::Public
    };

    let provider =
        AwsCliProvider::with_process_runner(&prepared.settings.aws_bin, &prepared.decision.region);
    let token = CancellationToken::new();
    let listener = spawn_interrupt_listener(token.clone());
    let controller = LaunchController::new(provider, token)
        .with_poll_interval(prepared.settings.poll_interval());

    let result = controller
        .execute(&prepared.submission, mode, address)
        .await;
    listener.abort();

    let outcome = result?;
    write_outcome(io::stdout(), &outcome, address)?;
    write_warnings(io::stderr(), &outcome)?;
    Ok(())
}

const fn run_mode(command: &LaunchCommand) -> RunMode {
    if command.full_wait {
        RunMode::FullWait
    } else if command.wait {
        RunMode::WaitForFulfilment
    } else {
        RunMode::NoWait
    }
}

/// Loads settings, the launch spec and user data, resolves the region and
/// builds the submission. Nothing here talks to AWS.
fn prepare(args: &SpecArgs) -> Result<Prepared, CliError> {
    let settings = LauncherConfig::load_without_cli_args()?;
    let spec = LaunchSpec::load(Utf8Path::new(&args.launch_spec))?;

    let aws = CredentialRegionConfig::from_environment()?;
    if !aws.has_credentials {
        tracing::info!("no static AWS credentials found; relying on the aws CLI's own chain");
    }
    let decision = region::resolve(aws.sources(spec.availability_zone()))?;
    tracing::info!(
        region = %decision.region,
        zone = decision.zone.as_deref().unwrap_or("-"),
        source = %decision.source,
        "resolved launch region"
    );

    let user_data_path = args
        .user_data
        .as_deref()
        .map(Utf8PathBuf::from)
        .or_else(|| spec.user_data_file.clone());
    let user_data = user_data_path
        .as_deref()
        .map(UserData::load)
        .transpose()?;
    if let Some(data) = &user_data
        && data.exceeds(settings.user_data_warn_bytes)
    {
        tracing::warn!(
            bytes = data.raw_len(),
            limit = settings.user_data_warn_bytes,
            "user data is large; EC2 may leave the spot requests open indefinitely"
        );
    }

    let submission = SpotSubmission::build(&spec, &decision, user_data.as_ref());
    Ok(Prepared {
        settings,
        decision,
        submission,
    })
}

fn write_outcome(
    mut target: impl Write,
    outcome: &LaunchOutcome,
    address: AddressKind,
) -> io::Result<()> {
    match outcome {
        LaunchOutcome::Submitted { request_ids, .. } => {
            for id in request_ids {
                writeln!(target, "{id}")?;
            }
        }
        LaunchOutcome::Launched { instances, .. } => {
            for handle in instances {
                writeln!(target, "{}", handle.output_line(address))?;
            }
        }
    }
    Ok(())
}

fn write_warnings(mut target: impl Write, outcome: &LaunchOutcome) -> io::Result<()> {
    for warning in outcome.warnings() {
        writeln!(target, "warning: {warning}")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
    if let CliError::Launch(launch) = err
        && let Some(cleanup) = launch.cleanup()
    {
        writeln!(target, "{cleanup}").ok();
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
