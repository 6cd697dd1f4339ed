//! Provider capability set used by the launch lifecycle.
//!
//! Every lifecycle stage is expressed in terms of [`ProviderApi`], so the
//! controller runs unchanged against EC2 (through the `aws` CLI) or against
//! an in-memory fake.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use crate::request::SpotSubmission;

pub mod aws;
pub mod runner;
pub mod types;

pub use aws::{AwsCliProvider, AwsError};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use types::{InstanceId, RequestId};

/// Provider view of one spot sub-request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestState {
    /// Waiting for capacity.
    Open,
    /// Matched to a running instance.
    Fulfilled {
        /// Instance launched for the request.
        instance_id: InstanceId,
    },
    /// Held on a capacity or placement constraint. The provider calls this
    /// open, but such requests do not recover.
    Unfulfillable {
        /// Provider status code.
        code: String,
        /// Provider status message.
        message: String,
    },
    /// Cancelled before fulfilment.
    Cancelled {
        /// Provider status code.
        code: String,
        /// Provider status message.
        message: String,
    },
    /// Failed terminally.
    Failed {
        /// Provider status code.
        code: String,
        /// Provider status message.
        message: String,
    },
}

impl RequestState {
    /// Whether the provider will never move the request again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fulfilled { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

/// Status of one spot request as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpotRequestStatus {
    /// Request identifier.
    pub request_id: RequestId,
    /// Current state.
    pub state: RequestState,
}

/// Provider readiness signal for an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceHealth {
    /// Not yet running.
    Pending,
    /// Running but status checks are still initialising.
    Initialising,
    /// Running with status checks past initialisation.
    Ready,
    /// Shutting down or gone.
    Terminated,
}

/// Instance status and addressing as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStatus {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Readiness signal.
    pub health: InstanceHealth,
    /// Public IP address, once assigned.
    pub public_ip: Option<IpAddr>,
    /// Private IP address, once assigned.
    pub private_ip: Option<IpAddr>,
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability set a spot launch needs from the cloud provider.
pub trait ProviderApi {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submits one batch spot request and returns one identifier per
    /// requested instance.
    fn submit_spot_request<'a>(
        &'a self,
        submission: &'a SpotSubmission,
    ) -> ProviderFuture<'a, Vec<RequestId>, Self::Error>;

    /// Describes the given spot requests. Identifiers unknown to the provider
    /// are omitted from the result.
    fn describe_spot_requests<'a>(
        &'a self,
        ids: &'a [RequestId],
    ) -> ProviderFuture<'a, Vec<SpotRequestStatus>, Self::Error>;

    /// Describes readiness and addressing of the given instances.
    fn describe_instances<'a>(
        &'a self,
        ids: &'a [InstanceId],
    ) -> ProviderFuture<'a, Vec<InstanceStatus>, Self::Error>;

    /// Cancels one spot request.
    fn cancel_spot_request<'a>(&'a self, id: &'a RequestId)
    -> ProviderFuture<'a, (), Self::Error>;

    /// Terminates one instance.
    fn terminate_instance<'a>(&'a self, id: &'a InstanceId)
    -> ProviderFuture<'a, (), Self::Error>;
}
