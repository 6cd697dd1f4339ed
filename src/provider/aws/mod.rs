//! EC2 provider backed by the `aws` command-line client.
//!
//! Each capability maps to one `aws ec2` subcommand run with
//! `--output json`; responses are parsed with `serde`. Describe calls treat
//! `*.NotFound` errors as "not visible yet", since freshly created requests
//! and instances can lag behind in the EC2 API.

use std::ffi::OsString;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
use super::{
    InstanceHealth, InstanceId, InstanceStatus, ProviderApi, ProviderFuture, RequestId,
    RequestState, SpotRequestStatus,
};
use crate::request::SpotSubmission;

/// Status codes that hold a request open on a constraint it will not
/// escape; treated as unfulfillable.
const HOLDING_CODES: &[&str] = &[
    "constraint-not-fulfillable",
    "capacity-not-available",
    "capacity-oversubscribed",
    "az-group-constraint",
    "placement-group-constraint",
    "launch-group-constraint",
];

const FAILED_CODES: &[&str] = &["system-error", "bad-parameters", "schedule-expired"];

/// Errors raised by the `aws` CLI provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsError {
    /// Raised when `aws` exits unsuccessfully. `stderr` carries the
    /// provider's message verbatim.
    #[error("aws ec2 {operation} exited with status {status_text}: {stderr}")]
    Command {
        /// EC2 operation that failed.
        operation: String,
        /// Exit status rendered for humans.
        status_text: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// Raised when the JSON output cannot be parsed.
    #[error("failed to parse aws ec2 {operation} output: {message}")]
    Parse {
        /// EC2 operation whose output was malformed.
        operation: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when `aws` cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Provider that shells out to `aws ec2` in a fixed region.
#[derive(Clone, Debug)]
pub struct AwsCliProvider<R = ProcessCommandRunner> {
    runner: R,
    aws_bin: String,
    region: String,
}

impl AwsCliProvider<ProcessCommandRunner> {
    /// Creates a provider wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(aws_bin: impl Into<String>, region: impl Into<String>) -> Self {
        Self::new(ProcessCommandRunner, aws_bin, region)
    }
}

impl<R: CommandRunner> AwsCliProvider<R> {
    /// Creates a provider using the given runner.
    #[must_use]
    pub fn new(runner: R, aws_bin: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
            region: region.into(),
        }
    }

    /// Region every call is addressed to.
    #[must_use]
    pub const fn region(&self) -> &str {
        self.region.as_str()
    }

    fn build_args(&self, operation: &str, extra: Vec<OsString>) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("--region"),
            OsString::from(&self.region),
            OsString::from("--output"),
            OsString::from("json"),
            OsString::from("ec2"),
            OsString::from(operation),
        ];
        args.extend(extra);
        args
    }

    fn run(&self, operation: &str, extra: Vec<OsString>) -> Result<CommandOutput, AwsError> {
        let args = self.build_args(operation, extra);
        tracing::debug!(operation, region = %self.region, "calling aws ec2");
        let output = self.runner.run(&self.aws_bin, &args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(AwsError::Command {
            operation: operation.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn run_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        extra: Vec<OsString>,
    ) -> Result<T, AwsError> {
        let output = self.run(operation, extra)?;
        parse(operation, &output.stdout)
    }

    /// Like [`Self::run_json`], mapping `*.NotFound` failures to `None`.
    fn run_json_visible<T: DeserializeOwned>(
        &self,
        operation: &str,
        extra: Vec<OsString>,
    ) -> Result<Option<T>, AwsError> {
        match self.run_json(operation, extra) {
            Ok(value) => Ok(Some(value)),
            Err(AwsError::Command { ref stderr, .. }) if stderr.contains(".NotFound") => {
                tracing::debug!(operation, "identifiers not visible yet");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn submit(&self, submission: &SpotSubmission) -> Result<Vec<RequestId>, AwsError> {
        let specification = serde_json::to_string(&submission.launch_specification).map_err(
            |err| AwsError::Parse {
                operation: String::from("request-spot-instances"),
                message: err.to_string(),
            },
        )?;
        let response: SpotRequestsResponse = self.run_json(
            "request-spot-instances",
            vec![
                OsString::from("--instance-count"),
                OsString::from(submission.instance_count.to_string()),
                OsString::from("--spot-price"),
                OsString::from(submission.spot_price.as_str()),
                OsString::from("--client-token"),
                OsString::from(&submission.client_token),
                OsString::from("--launch-specification"),
                OsString::from(specification),
            ],
        )?;
        Ok(response
            .spot_instance_requests
            .into_iter()
            .map(|request| RequestId::from(request.spot_instance_request_id))
            .collect())
    }

    fn describe_requests(&self, ids: &[RequestId]) -> Result<Vec<SpotRequestStatus>, AwsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response: Option<SpotRequestsResponse> = self.run_json_visible(
            "describe-spot-instance-requests",
            id_args("--spot-instance-request-ids", ids),
        )?;
        Ok(response
            .map(|body| body.spot_instance_requests)
            .unwrap_or_default()
            .into_iter()
            .map(|request| SpotRequestStatus {
                state: classify_request(&request),
                request_id: RequestId::from(request.spot_instance_request_id),
            })
            .collect())
    }

    fn describe(&self, ids: &[InstanceId]) -> Result<Vec<InstanceStatus>, AwsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let Some(instances) = self
            .run_json_visible::<InstancesResponse>("describe-instances", id_args("--instance-ids", ids))?
        else {
            return Ok(Vec::new());
        };
        let mut extra = id_args("--instance-ids", ids);
        extra.push(OsString::from("--include-all-instances"));
        let checks = self
            .run_json_visible::<InstanceStatusResponse>("describe-instance-status", extra)?
            .map(|body| body.instance_statuses)
            .unwrap_or_default();

        Ok(instances
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .map(|instance| {
                let check = checks
                    .iter()
                    .find(|status| status.instance_id == instance.instance_id);
                InstanceStatus {
                    health: classify_instance(&instance.state.name, check),
                    public_ip: parse_ip(instance.public_ip_address.as_deref()),
                    private_ip: parse_ip(instance.private_ip_address.as_deref()),
                    instance_id: InstanceId::from(instance.instance_id),
                }
            })
            .collect())
    }
}

impl<R> ProviderApi for AwsCliProvider<R>
where
    R: CommandRunner + Send + Sync,
{
    type Error = AwsError;

    fn submit_spot_request<'a>(
        &'a self,
        submission: &'a SpotSubmission,
    ) -> ProviderFuture<'a, Vec<RequestId>, Self::Error> {
        Box::pin(async move { self.submit(submission) })
    }

    fn describe_spot_requests<'a>(
        &'a self,
        ids: &'a [RequestId],
    ) -> ProviderFuture<'a, Vec<SpotRequestStatus>, Self::Error> {
        Box::pin(async move { self.describe_requests(ids) })
    }

    fn describe_instances<'a>(
        &'a self,
        ids: &'a [InstanceId],
    ) -> ProviderFuture<'a, Vec<InstanceStatus>, Self::Error> {
        Box::pin(async move { self.describe(ids) })
    }

    fn cancel_spot_request<'a>(
        &'a self,
        id: &'a RequestId,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.run(
                "cancel-spot-instance-requests",
                id_args("--spot-instance-request-ids", std::slice::from_ref(id)),
            )
            .map(|_| ())
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.run(
                "terminate-instances",
                id_args("--instance-ids", std::slice::from_ref(id)),
            )
            .map(|_| ())
        })
    }
}

fn id_args<I: AsRef<str>>(flag: &str, ids: &[I]) -> Vec<OsString> {
    let mut args = Vec::with_capacity(ids.len() + 1);
    args.push(OsString::from(flag));
    args.extend(ids.iter().map(|id| OsString::from(id.as_ref())));
    args
}

fn parse<T: DeserializeOwned>(operation: &str, stdout: &str) -> Result<T, AwsError> {
    serde_json::from_str(stdout).map_err(|err| AwsError::Parse {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

fn parse_ip(value: Option<&str>) -> Option<IpAddr> {
    value.and_then(|text| IpAddr::from_str(text).ok())
}

/// Maps an EC2 spot request onto the lifecycle's request states.
pub(crate) fn classify_request(request: &AwsSpotRequest) -> RequestState {
    let code = request.status.code.clone();
    let message = request.status.message.clone().unwrap_or_default();

    if code.starts_with("instance-terminated") {
        return RequestState::Cancelled { code, message };
    }
    if let Some(instance_id) = &request.instance_id
        && (request.state == "active"
            || code == "fulfilled"
            || code == "request-canceled-and-instance-running")
    {
        return RequestState::Fulfilled {
            instance_id: InstanceId::from(instance_id.as_str()),
        };
    }
    if HOLDING_CODES.contains(&code.as_str()) {
        return RequestState::Unfulfillable { code, message };
    }
    if FAILED_CODES.contains(&code.as_str()) {
        return RequestState::Failed { code, message };
    }
    if code == "canceled-before-fulfillment" {
        return RequestState::Cancelled { code, message };
    }
    match request.state.as_str() {
        "failed" => RequestState::Failed { code, message },
        "cancelled" | "closed" => RequestState::Cancelled { code, message },
        _ => RequestState::Open,
    }
}

fn classify_instance(state: &str, check: Option<&AwsInstanceStatus>) -> InstanceHealth {
    match state {
        "pending" => InstanceHealth::Pending,
        "running" => match check {
            Some(status)
                if status.system_status.status != "initializing"
                    && status.instance_status.status != "initializing" =>
            {
                InstanceHealth::Ready
            }
            _ => InstanceHealth::Initialising,
        },
        _ => InstanceHealth::Terminated,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotRequestsResponse {
    #[serde(default)]
    spot_instance_requests: Vec<AwsSpotRequest>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AwsSpotRequest {
    pub(crate) spot_instance_request_id: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) status: AwsRequestStatus,
    pub(crate) instance_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AwsRequestStatus {
    #[serde(default)]
    pub(crate) code: String,
    pub(crate) message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesResponse {
    #[serde(default)]
    reservations: Vec<AwsReservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsReservation {
    #[serde(default)]
    instances: Vec<AwsInstance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsInstance {
    instance_id: String,
    state: AwsStateName,
    public_ip_address: Option<String>,
    private_ip_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsStateName {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceStatusResponse {
    #[serde(default)]
    instance_statuses: Vec<AwsInstanceStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsInstanceStatus {
    instance_id: String,
    system_status: AwsCheck,
    instance_status: AwsCheck,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsCheck {
    status: String,
}
