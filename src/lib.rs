//! Core library for the spotlaunch EC2 spot instance launcher.
//!
//! The crate resolves where to launch, turns a JSON launch specification
//! into an EC2 spot request, and drives the request lifecycle (submit →
//! wait for fulfilment → wait for initialisation) behind a provider
//! abstraction, tearing down whatever was created when the run is
//! interrupted or fails.

pub mod aws_config;
pub mod config;
mod files;
pub mod launch;
pub mod launch_spec;
pub mod provider;
pub mod region;
pub mod request;
pub mod test_support;
pub mod user_data;

pub use aws_config::CredentialRegionConfig;
pub use config::{ConfigError, LauncherConfig};
pub use launch::{
    AddressKind, CleanupSummary, EXIT_ABORTED, EXIT_FAILURE, InstanceHandle, LaunchController,
    LaunchError, LaunchOutcome, LaunchWarning, RunMode, spawn_interrupt_listener,
};
pub use launch_spec::{BidPrice, LaunchSpec};
pub use provider::{AwsCliProvider, AwsError, InstanceId, ProviderApi, RequestId};
pub use region::{RegionSource, RegionZoneDecision};
pub use request::SpotSubmission;
pub use user_data::{EncodingError, UserData};
