//! Polls spot request status until every live request is terminal.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{
    FailureKind, InstanceHandle, PollError, RequestFailure, RunPhase, RunState, sleep_or_cancel,
};
use crate::provider::{ProviderApi, RequestId, RequestState};

/// Waits for live requests to be fulfilled, cancelled or failed.
///
/// Each cycle sleeps first and then queries; the sleep is the point where
/// cancellation is observed. There is no overall timeout: a request that
/// never settles keeps the poller waiting until the token fires.
#[derive(Debug)]
pub struct FulfilmentPoller<'a, P> {
    provider: &'a P,
    token: &'a CancellationToken,
    interval: Duration,
}

impl<'a, P> FulfilmentPoller<'a, P>
where
    P: ProviderApi + Sync,
{
    /// Creates a poller.
    #[must_use]
    pub const fn new(provider: &'a P, token: &'a CancellationToken, interval: Duration) -> Self {
        Self {
            provider,
            token,
            interval,
        }
    }

    /// Polls until the live set in `state` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Cancelled`] when the token fires and
    /// [`PollError::Provider`] when describing requests fails.
    pub async fn run(&self, state: &mut RunState) -> Result<(), PollError<P::Error>> {
        state.set_phase(RunPhase::AwaitingFulfilment);
        while !state.live().is_empty() {
            sleep_or_cancel(self.token, self.interval).await?;
            self.poll_once(state).await?;
        }
        Ok(())
    }

    /// Performs one status query and applies it to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Provider`] when describing requests fails.
    pub async fn poll_once(&self, state: &mut RunState) -> Result<(), PollError<P::Error>> {
        let ids: Vec<RequestId> = state.live().iter().cloned().collect();
        let statuses = self
            .provider
            .describe_spot_requests(&ids)
            .await
            .map_err(PollError::provider("describing spot requests"))?;

        for status in statuses {
            if !state.is_live(&status.request_id) {
                continue;
            }
            self.apply(state, status.request_id, status.state).await;
        }
        tracing::debug!(live = state.live().len(), "fulfilment poll complete");

        self.fill_addresses(state).await;
        Ok(())
    }

    async fn apply(&self, state: &mut RunState, request_id: RequestId, request_state: RequestState) {
        let (kind, code, message) = match request_state {
            RequestState::Open => return,
            RequestState::Fulfilled { instance_id } => {
                tracing::info!(%request_id, %instance_id, "spot request fulfilled");
                state.settle(&request_id);
                state.record_instance(InstanceHandle::new(instance_id, request_id));
                return;
            }
            RequestState::Unfulfillable { code, message } => {
                tracing::warn!(%request_id, %code, "spot request cannot be fulfilled; cancelling");
                if let Err(err) = self.provider.cancel_spot_request(&request_id).await {
                    tracing::warn!(
                        %request_id,
                        error = %err,
                        "failed to cancel unfulfillable request; retrying at cleanup"
                    );
                    state.defer_cancel(request_id.clone());
                }
                (FailureKind::Unfulfillable, code, message)
            }
            RequestState::Cancelled { code, message } => (FailureKind::Cancelled, code, message),
            RequestState::Failed { code, message } => (FailureKind::Failed, code, message),
        };
        tracing::warn!(%request_id, %kind, %code, "spot request ended without an instance");
        state.settle(&request_id);
        state.record_failure(RequestFailure {
            request_id,
            kind,
            code,
            message,
        });
    }

    /// Best-effort address lookup for instances still missing one.
    async fn fill_addresses(&self, state: &mut RunState) {
        let pending = state.unaddressed();
        if pending.is_empty() {
            return;
        }
        match self.provider.describe_instances(&pending).await {
            Ok(statuses) => {
                for status in statuses {
                    state.update_addresses(&status.instance_id, status.public_ip, status.private_ip);
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "instance addresses not available yet");
            }
        }
    }
}
