//! Spot launch lifecycle: submit, wait for fulfilment, wait for
//! initialisation, and tear down on abort.
//!
//! [`controller::LaunchController`] sequences the stages for one run. All
//! stages share a [`RunState`] owned by the controller and passed by
//! `&mut`; the interrupt listener in [`cancel`] only flips a
//! [`CancellationToken`], which the pollers observe while sleeping.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_POLL_INTERVAL_SECS;
use crate::provider::{InstanceId, RequestId};

pub mod cancel;
pub mod controller;
pub mod fulfilment;
pub mod initialisation;
mod state;
pub mod submit;

pub use cancel::{CancellationHandler, listen_for_interrupts, spawn_interrupt_listener};
pub use controller::LaunchController;
pub use fulfilment::FulfilmentPoller;
pub use initialisation::InitialisationPoller;
pub use state::{FailureKind, InstanceHandle, RequestFailure, RunPhase, RunState};

/// Exit status used when a run is aborted by an interrupt.
pub const EXIT_ABORTED: i32 = 130;

/// Exit status used for every other failed run.
pub const EXIT_FAILURE: i32 = 1;

/// Interval between polls unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS);

/// How far the launcher follows a submission.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RunMode {
    /// Submit and return the request identifiers.
    #[default]
    NoWait,
    /// Wait until every request is fulfilled, cancelled or failed.
    WaitForFulfilment,
    /// Wait for fulfilment, then for the provider's readiness signal.
    FullWait,
}

/// Which instance address is reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AddressKind {
    /// Public IP address.
    #[default]
    Public,
    /// Private IP address.
    Private,
}

/// Non-fatal conditions reported alongside a successful launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchWarning {
    /// Fewer instances were launched than requested.
    PartialFulfilment {
        /// Instances launched.
        fulfilled: usize,
        /// Instances requested.
        requested: u32,
    },
    /// A sub-request ended without an instance.
    RequestNotFulfilled(RequestFailure),
    /// The provider terminated an instance while it was initialising.
    InstanceTerminated(InstanceId),
    /// A request could not be cancelled and may still be open upstream.
    RequestLeftOpen(TeardownFailure),
    /// The provider returned a different number of request identifiers
    /// than instances requested.
    UnexpectedRequestCount {
        /// Instances requested.
        requested: u32,
        /// Identifiers returned.
        received: usize,
    },
}

impl fmt::Display for LaunchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialFulfilment {
                fulfilled,
                requested,
            } => write!(f, "only {fulfilled} of {requested} instances launched"),
            Self::RequestNotFulfilled(failure) => write!(f, "{failure}"),
            Self::RequestLeftOpen(failure) => {
                write!(f, "{failure}; the request may still be open")
            }
            Self::InstanceTerminated(id) => {
                write!(f, "instance {id} was terminated before it became ready")
            }
            Self::UnexpectedRequestCount {
                requested,
                received,
            } => write!(
                f,
                "requested {requested} instances but the provider returned {received} request ids"
            ),
        }
    }
}

/// Result of a successful run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchOutcome {
    /// No-wait mode: the request identifiers that were submitted.
    Submitted {
        /// Provider-assigned request identifiers.
        request_ids: Vec<RequestId>,
        /// Warnings raised during submission.
        warnings: Vec<LaunchWarning>,
    },
    /// Wait modes: the instances launched.
    Launched {
        /// Launched instances in fulfilment order.
        instances: Vec<InstanceHandle>,
        /// Partial fulfilment and per-request warnings.
        warnings: Vec<LaunchWarning>,
    },
}

impl LaunchOutcome {
    /// Warnings attached to the outcome.
    #[must_use]
    pub fn warnings(&self) -> &[LaunchWarning] {
        match self {
            Self::Submitted { warnings, .. } | Self::Launched { warnings, .. } => warnings,
        }
    }
}

/// Object of a teardown call that failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownTarget {
    /// Cancelling a spot request.
    Request(RequestId),
    /// Terminating an instance.
    Instance(InstanceId),
    /// Re-describing cancelled requests to catch late fulfilment.
    LateFulfilmentCheck,
}

impl fmt::Display for TeardownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(id) => write!(f, "cancel request {id}"),
            Self::Instance(id) => write!(f, "terminate instance {id}"),
            Self::LateFulfilmentCheck => f.write_str("check cancelled requests for late fulfilment"),
        }
    }
}

/// One teardown call that failed during cleanup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// What was being torn down.
    pub target: TeardownTarget,
    /// Provider error message.
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {}: {}", self.target, self.message)
    }
}

/// What cleanup did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Requests cancelled.
    pub cancelled_requests: Vec<RequestId>,
    /// Instances terminated.
    pub terminated_instances: Vec<InstanceId>,
    /// Teardown calls that failed.
    pub failures: Vec<TeardownFailure>,
}

impl CleanupSummary {
    /// Whether every teardown call succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cleanup: cancelled {} request(s), terminated {} instance(s)",
            self.cancelled_requests.len(),
            self.terminated_instances.len()
        )?;
        for id in &self.cancelled_requests {
            write!(f, "\n  cancelled {id}")?;
        }
        for id in &self.terminated_instances {
            write!(f, "\n  terminated {id}")?;
        }
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

/// Errors surfaced by a launch run.
///
/// Every variant raised after submission carries the [`CleanupSummary`] of
/// the teardown that preceded it.
#[derive(Debug, Error)]
pub enum LaunchError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider refused the submission. Nothing was created.
    #[error("spot request rejected: {0}")]
    Rejected(#[source] E),
    /// A provider call failed after submission.
    #[error("{message}")]
    Provider {
        /// Human-readable description including teardown notes.
        message: String,
        /// Provider-specific error.
        #[source]
        source: E,
        /// Teardown performed before returning.
        cleanup: CleanupSummary,
    },
    /// No instance was launched.
    #[error("no instances launched{}", describe_failures(.failures))]
    TotalFailure {
        /// Why each request ended without an instance.
        failures: Vec<RequestFailure>,
        /// Teardown performed before returning.
        cleanup: CleanupSummary,
    },
    /// The operator interrupted the run.
    #[error("launch aborted by interrupt")]
    Aborted(CleanupSummary),
}

impl<E> LaunchError<E>
where
    E: std::error::Error + 'static,
{
    /// Process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Aborted(_) => EXIT_ABORTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Teardown performed before the error was returned, if any.
    #[must_use]
    pub const fn cleanup(&self) -> Option<&CleanupSummary> {
        match self {
            Self::Rejected(_) => None,
            Self::Provider { cleanup, .. }
            | Self::TotalFailure { cleanup, .. }
            | Self::Aborted(cleanup) => Some(cleanup),
        }
    }
}

fn describe_failures(failures: &[RequestFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let joined = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!(": {joined}")
}

/// Appends teardown failures to `message` so they are not lost behind the
/// primary error.
pub(crate) fn append_teardown_note(message: String, cleanup: &CleanupSummary) -> String {
    if cleanup.is_clean() {
        return message;
    }
    let notes = cleanup
        .failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{message} (teardown also failed: {notes})")
}

/// Why a poller stopped early.
#[derive(Debug)]
pub enum PollError<E> {
    /// The run's cancellation token fired.
    Cancelled,
    /// A provider call failed.
    Provider {
        /// What the poller was doing.
        context: &'static str,
        /// Provider-specific error.
        source: E,
    },
}

impl<E> PollError<E> {
    pub(crate) fn provider(context: &'static str) -> impl Fn(E) -> Self {
        move |source| Self::Provider { context, source }
    }
}

/// Sleeps for `interval` unless `token` fires first.
pub(crate) async fn sleep_or_cancel<E>(
    token: &CancellationToken,
    interval: Duration,
) -> Result<(), PollError<E>> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(PollError::Cancelled),
        () = sleep(interval) => Ok(()),
    }
}
