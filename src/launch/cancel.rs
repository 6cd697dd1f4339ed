//! Interrupt handling and best-effort teardown.

use std::collections::BTreeSet;
use std::future::Future;
use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CleanupSummary, RunPhase, RunState, TeardownFailure, TeardownTarget};
use crate::provider::{InstanceId, ProviderApi, RequestId, RequestState};

/// Tears down whatever a run has created so far.
#[derive(Debug)]
pub struct CancellationHandler<'a, P> {
    provider: &'a P,
}

impl<'a, P> CancellationHandler<'a, P>
where
    P: ProviderApi + Sync,
{
    /// Creates a handler.
    #[must_use]
    pub const fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Cancels every live request and every request whose earlier
    /// cancellation failed, terminates every launched instance, then
    /// re-describes the cancelled requests and terminates instances that a
    /// late fulfilment attached to them.
    ///
    /// Every call is attempted individually; failures are logged and
    /// collected in the summary without stopping the remaining calls. The
    /// live set, the deferred cancellations and the instance list in
    /// `state` are emptied.
    pub async fn cleanup(&self, state: &mut RunState) -> CleanupSummary {
        state.set_phase(RunPhase::Cancelling);
        let mut summary = CleanupSummary::default();

        let mut live = state.take_live();
        live.extend(state.take_uncancelled());
        for id in &live {
            self.cancel_request(id, &mut summary).await;
        }

        let mut terminated = BTreeSet::new();
        for handle in state.take_instances() {
            if terminated.insert(handle.instance_id.clone()) {
                self.terminate(&handle.instance_id, &mut summary).await;
            }
        }

        for instance_id in self.late_fulfilments(&live, &mut summary).await {
            if terminated.insert(instance_id.clone()) {
                tracing::warn!(%instance_id, "terminating instance from late fulfilment");
                self.terminate(&instance_id, &mut summary).await;
            }
        }

        tracing::info!(
            cancelled = summary.cancelled_requests.len(),
            terminated = summary.terminated_instances.len(),
            failures = summary.failures.len(),
            "cleanup finished"
        );
        summary
    }

    /// Retries cancellations that failed while polling, for runs that
    /// otherwise succeed. Returns the calls that failed again.
    pub async fn retry_deferred_cancels(&self, state: &mut RunState) -> Vec<TeardownFailure> {
        let mut summary = CleanupSummary::default();
        for id in state.take_uncancelled() {
            self.cancel_request(&id, &mut summary).await;
        }
        summary.failures
    }

    async fn cancel_request(&self, id: &RequestId, summary: &mut CleanupSummary) {
        match self.provider.cancel_spot_request(id).await {
            Ok(()) => {
                tracing::info!(request_id = %id, "cancelled spot request");
                summary.cancelled_requests.push(id.clone());
            }
            Err(err) => {
                tracing::warn!(request_id = %id, error = %err, "failed to cancel spot request");
                summary.failures.push(TeardownFailure {
                    target: TeardownTarget::Request(id.clone()),
                    message: err.to_string(),
                });
            }
        }
    }

    async fn terminate(&self, id: &InstanceId, summary: &mut CleanupSummary) {
        match self.provider.terminate_instance(id).await {
            Ok(()) => {
                tracing::info!(instance_id = %id, "terminated instance");
                summary.terminated_instances.push(id.clone());
            }
            Err(err) => {
                tracing::warn!(instance_id = %id, error = %err, "failed to terminate instance");
                summary.failures.push(TeardownFailure {
                    target: TeardownTarget::Instance(id.clone()),
                    message: err.to_string(),
                });
            }
        }
    }

    async fn late_fulfilments(
        &self,
        cancelled: &[RequestId],
        summary: &mut CleanupSummary,
    ) -> Vec<InstanceId> {
        if cancelled.is_empty() {
            return Vec::new();
        }
        match self.provider.describe_spot_requests(cancelled).await {
            Ok(statuses) => statuses
                .into_iter()
                .filter_map(|status| match status.state {
                    RequestState::Fulfilled { instance_id } => Some(instance_id),
                    _ => None,
                })
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to re-check cancelled requests");
                summary.failures.push(TeardownFailure {
                    target: TeardownTarget::LateFulfilmentCheck,
                    message: err.to_string(),
                });
                Vec::new()
            }
        }
    }
}

/// Cancels `token` on the first interrupt and ignores later ones.
///
/// `next_interrupt` resolves once per interrupt; an error ends the
/// listener. Returns the number of interrupts seen.
pub async fn listen_for_interrupts<S, F>(token: CancellationToken, mut next_interrupt: S) -> usize
where
    S: FnMut() -> F,
    F: Future<Output = io::Result<()>>,
{
    let mut seen = 0;
    loop {
        if let Err(err) = next_interrupt().await {
            tracing::warn!(error = %err, "interrupt listener stopped");
            return seen;
        }
        seen += 1;
        if token.is_cancelled() {
            tracing::warn!("cleanup already in progress; ignoring repeated interrupt");
            continue;
        }
        tracing::warn!("interrupt received; cancelling outstanding spot requests");
        token.cancel();
    }
}

/// Spawns [`listen_for_interrupts`] on Ctrl-C for the lifetime of a run.
///
/// Abort the returned handle once the run reaches a terminal phase.
#[must_use]
pub fn spawn_interrupt_listener(token: CancellationToken) -> JoinHandle<usize> {
    tokio::spawn(listen_for_interrupts(token, tokio::signal::ctrl_c))
}
