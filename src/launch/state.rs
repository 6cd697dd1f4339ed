//! Mutable state of one launch run.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use super::AddressKind;
use crate::provider::{InstanceId, RequestId};

/// Lifecycle phase of a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RunPhase {
    /// Submitting the batch request.
    #[default]
    Submitting,
    /// Polling request status.
    AwaitingFulfilment,
    /// Polling instance readiness.
    AwaitingInitialisation,
    /// Tearing down after an abort or failure.
    Cancelling,
    /// Finished, successfully or not.
    Done,
}

/// An instance produced by a fulfilled sub-request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Spot request that produced the instance.
    pub request_id: RequestId,
    /// Public IP address, once known.
    pub public_ip: Option<IpAddr>,
    /// Private IP address, once known.
    pub private_ip: Option<IpAddr>,
}

impl InstanceHandle {
    /// Creates a handle with no addresses yet.
    #[must_use]
    pub const fn new(instance_id: InstanceId, request_id: RequestId) -> Self {
        Self {
            instance_id,
            request_id,
            public_ip: None,
            private_ip: None,
        }
    }

    /// The address of the requested kind, if known.
    #[must_use]
    pub const fn address(&self, kind: AddressKind) -> Option<IpAddr> {
        match kind {
            AddressKind::Public => self.public_ip,
            AddressKind::Private => self.private_ip,
        }
    }

    /// Renders the `<instance-id> <ip>` output line; `-` stands in for an
    /// unknown address.
    #[must_use]
    pub fn output_line(&self, kind: AddressKind) -> String {
        self.address(kind).map_or_else(
            || format!("{} -", self.instance_id),
            |ip| format!("{} {ip}", self.instance_id),
        )
    }

    const fn has_all_addresses(&self) -> bool {
        self.public_ip.is_some() && self.private_ip.is_some()
    }
}

/// How a sub-request ended without an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// Held on a constraint and cancelled by the launcher.
    Unfulfillable,
    /// Cancelled by the provider or another party.
    Cancelled,
    /// Failed terminally.
    Failed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unfulfillable => "unfulfillable",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        })
    }
}

/// A sub-request that ended without an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestFailure {
    /// Request identifier.
    pub request_id: RequestId,
    /// How the request ended.
    pub kind: FailureKind,
    /// Provider status code.
    pub code: String,
    /// Provider status message.
    pub message: String,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request {} {} ({})", self.request_id, self.kind, self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// State shared by the stages of one run.
///
/// Owned by the controller; pollers and the cancellation handler borrow it
/// mutably in turn, so cleanup always sees the latest live set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunState {
    phase: RunPhase,
    live: BTreeSet<RequestId>,
    instances: Vec<InstanceHandle>,
    failures: Vec<RequestFailure>,
    uncancelled: BTreeSet<RequestId>,
}

impl RunState {
    /// Creates an empty state in the submitting phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Request identifiers that have not reached a terminal state.
    #[must_use]
    pub const fn live(&self) -> &BTreeSet<RequestId> {
        &self.live
    }

    /// Instances produced so far.
    #[must_use]
    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    /// Sub-requests that ended without an instance.
    #[must_use]
    pub fn failures(&self) -> &[RequestFailure] {
        &self.failures
    }

    pub(crate) const fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub(crate) fn track<I: IntoIterator<Item = RequestId>>(&mut self, ids: I) {
        self.live.extend(ids);
    }

    pub(crate) fn is_live(&self, id: &RequestId) -> bool {
        self.live.contains(id)
    }

    pub(crate) fn settle(&mut self, id: &RequestId) {
        self.live.remove(id);
    }

    pub(crate) fn record_instance(&mut self, handle: InstanceHandle) {
        self.instances.push(handle);
    }

    pub(crate) fn record_failure(&mut self, failure: RequestFailure) {
        self.failures.push(failure);
    }

    /// Settled requests the launcher tried and failed to cancel. They may
    /// still be open upstream, so cleanup cancels them again.
    #[must_use]
    pub const fn uncancelled(&self) -> &BTreeSet<RequestId> {
        &self.uncancelled
    }

    pub(crate) fn defer_cancel(&mut self, id: RequestId) {
        self.uncancelled.insert(id);
    }

    /// Instances still missing an address.
    pub(crate) fn unaddressed(&self) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|handle| !handle.has_all_addresses())
            .map(|handle| handle.instance_id.clone())
            .collect()
    }

    pub(crate) fn instance(&self, id: &InstanceId) -> Option<&InstanceHandle> {
        self.instances.iter().find(|handle| &handle.instance_id == id)
    }

    /// Fills in addresses without discarding ones already known.
    pub(crate) fn update_addresses(
        &mut self,
        id: &InstanceId,
        public_ip: Option<IpAddr>,
        private_ip: Option<IpAddr>,
    ) {
        if let Some(handle) = self
            .instances
            .iter_mut()
            .find(|handle| &handle.instance_id == id)
        {
            handle.public_ip = public_ip.or(handle.public_ip);
            handle.private_ip = private_ip.or(handle.private_ip);
        }
    }

    pub(crate) fn drop_instance(&mut self, id: &InstanceId) {
        self.instances.retain(|handle| &handle.instance_id != id);
    }

    pub(crate) fn take_live(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.live).into_iter().collect()
    }

    pub(crate) fn take_instances(&mut self) -> Vec<InstanceHandle> {
        std::mem::take(&mut self.instances)
    }

    pub(crate) fn take_uncancelled(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.uncancelled).into_iter().collect()
    }

    pub(crate) fn take_failures(&mut self) -> Vec<RequestFailure> {
        std::mem::take(&mut self.failures)
    }
}
