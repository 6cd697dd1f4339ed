//! Full-wait readiness polling.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{AddressKind, PollError, RunPhase, RunState, sleep_or_cancel};
use crate::provider::{InstanceHealth, InstanceId, ProviderApi};

/// Waits until every launched instance passes the provider's status checks
/// and carries the address that will be printed.
///
/// Only the provider's own readiness signal is consulted; nothing on the
/// instance itself (SSH, cloud-init) is probed.
#[derive(Debug)]
pub struct InitialisationPoller<'a, P> {
    provider: &'a P,
    token: &'a CancellationToken,
    interval: Duration,
}

impl<'a, P> InitialisationPoller<'a, P>
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

    /// Polls until every instance in `state` is ready.
    ///
    /// Instances the provider reports terminated are removed from `state`
    /// and returned so the caller can warn about them.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Cancelled`] when the token fires and
    /// [`PollError::Provider`] when describing instances fails.
    pub async fn run(
        &self,
        state: &mut RunState,
        address: AddressKind,
    ) -> Result<Vec<InstanceId>, PollError<P::Error>> {
        state.set_phase(RunPhase::AwaitingInitialisation);
        let mut waiting: BTreeSet<InstanceId> = state
            .instances()
            .iter()
            .map(|handle| handle.instance_id.clone())
            .collect();
        let mut terminated = Vec::new();

        while !waiting.is_empty() {
            sleep_or_cancel(self.token, self.interval).await?;
            let ids: Vec<InstanceId> = waiting.iter().cloned().collect();
            let statuses = self
                .provider
                .describe_instances(&ids)
                .await
                .map_err(PollError::provider("describing instances"))?;

            for status in statuses {
                if !waiting.contains(&status.instance_id) {
                    continue;
                }
                state.update_addresses(&status.instance_id, status.public_ip, status.private_ip);
                match status.health {
                    InstanceHealth::Terminated => {
                        tracing::warn!(instance_id = %status.instance_id, "instance terminated while initialising");
                        waiting.remove(&status.instance_id);
                        state.drop_instance(&status.instance_id);
                        terminated.push(status.instance_id);
                    }
                    InstanceHealth::Ready
                        if state
                            .instance(&status.instance_id)
                            .is_some_and(|handle| handle.address(address).is_some()) =>
                    {
                        tracing::info!(instance_id = %status.instance_id, "instance ready");
                        waiting.remove(&status.instance_id);
                    }
                    health => {
                        tracing::debug!(instance_id = %status.instance_id, ?health, "instance not ready");
                    }
                }
            }
        }
        Ok(terminated)
    }
}
