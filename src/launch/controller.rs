//! Sequences submission, polling and teardown for one run.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::fulfilment::FulfilmentPoller;
use super::initialisation::InitialisationPoller;
use super::submit::submit;
use super::{
    AddressKind, CancellationHandler, DEFAULT_POLL_INTERVAL, LaunchError, LaunchOutcome,
    LaunchWarning, PollError, RunMode, RunPhase, RunState, append_teardown_note,
};
use crate::provider::ProviderApi;
use crate::request::SpotSubmission;

/// Runs one spot launch against a provider.
///
/// Once the submission has been accepted, every failure path and every
/// interrupt goes through [`CancellationHandler::cleanup`] before the
/// controller returns.
#[derive(Debug)]
pub struct LaunchController<P> {
    provider: P,
    token: CancellationToken,
    poll_interval: Duration,
}

impl<P> LaunchController<P>
where
    P: ProviderApi + Sync,
{
    /// Creates a controller observing `token` for interrupts.
    #[must_use]
    pub const fn new(provider: P, token: CancellationToken) -> Self {
        Self {
            provider,
            token,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the polling interval.
    ///
    /// Tests use this to keep scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The provider the controller drives.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Executes one run.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Rejected`] when the provider refuses the
    /// submission, [`LaunchError::Aborted`] when the token fires (including
    /// when a provider call fails while an interrupt is pending),
    /// [`LaunchError::TotalFailure`] when no instance survives, and
    /// [`LaunchError::Provider`] when a provider call fails after
    /// submission.
    pub async fn execute(
        &self,
        submission: &SpotSubmission,
        mode: RunMode,
        address: AddressKind,
    ) -> Result<LaunchOutcome, LaunchError<P::Error>> {
        let mut state = RunState::new();
        let result = self.run(&mut state, submission, mode, address).await;
        state.set_phase(RunPhase::Done);
        result
    }

    async fn run(
        &self,
        state: &mut RunState,
        submission: &SpotSubmission,
        mode: RunMode,
        address: AddressKind,
    ) -> Result<LaunchOutcome, LaunchError<P::Error>> {
        let (request_ids, submit_warning) = match submit(&self.provider, submission, state).await {
            Ok(submitted) => submitted,
            Err(err) if self.token.is_cancelled() => {
                return Err(self.abort_interrupted_submit(state, submission, &err).await);
            }
            Err(err) => return Err(LaunchError::Rejected(err)),
        };
        let mut warnings: Vec<LaunchWarning> = submit_warning.into_iter().collect();
        self.checkpoint(state).await?;

        if mode == RunMode::NoWait {
            return Ok(LaunchOutcome::Submitted {
                request_ids,
                warnings,
            });
        }

        let fulfilment = FulfilmentPoller::new(&self.provider, &self.token, self.poll_interval);
        if let Err(err) = fulfilment.run(state).await {
            return Err(self.fail(state, err).await);
        }
        self.checkpoint(state).await?;

        let failures = state.take_failures();
        if state.instances().is_empty() {
            let cleanup = CancellationHandler::new(&self.provider).cleanup(state).await;
            return Err(LaunchError::TotalFailure { failures, cleanup });
        }
        warnings.extend(failures.into_iter().map(LaunchWarning::RequestNotFulfilled));
        let left_open = CancellationHandler::new(&self.provider)
            .retry_deferred_cancels(state)
            .await;
        warnings.extend(left_open.into_iter().map(LaunchWarning::RequestLeftOpen));

        if mode == RunMode::FullWait {
            let initialisation =
                InitialisationPoller::new(&self.provider, &self.token, self.poll_interval);
            match initialisation.run(state, address).await {
                Ok(terminated) => {
                    warnings.extend(terminated.into_iter().map(LaunchWarning::InstanceTerminated));
                }
                Err(err) => return Err(self.fail(state, err).await),
            }
            self.checkpoint(state).await?;
            if state.instances().is_empty() {
                let cleanup = CancellationHandler::new(&self.provider).cleanup(state).await;
                return Err(LaunchError::TotalFailure {
                    failures: Vec::new(),
                    cleanup,
                });
            }
        }

        let instances = state.take_instances();
        if u32::try_from(instances.len()).ok() != Some(submission.instance_count) {
            tracing::warn!(
                fulfilled = instances.len(),
                requested = submission.instance_count,
                "partial fulfilment"
            );
            warnings.insert(
                0,
                LaunchWarning::PartialFulfilment {
                    fulfilled: instances.len(),
                    requested: submission.instance_count,
                },
            );
        }
        Ok(LaunchOutcome::Launched {
            instances,
            warnings,
        })
    }

    /// Aborts with cleanup if the token fired since the last suspension
    /// point.
    async fn checkpoint(&self, state: &mut RunState) -> Result<(), LaunchError<P::Error>> {
        if self.token.is_cancelled() {
            return Err(self.abort(state).await);
        }
        Ok(())
    }

    async fn abort(&self, state: &mut RunState) -> LaunchError<P::Error> {
        tracing::warn!(live = state.live().len(), instances = state.instances().len(), "aborting run");
        LaunchError::Aborted(CancellationHandler::new(&self.provider).cleanup(state).await)
    }

    /// A failed submission racing an interrupt may still have been accepted
    /// upstream. Resubmitting with the same client token returns the
    /// existing requests instead of creating new ones, so their ids can be
    /// tracked and cancelled.
    async fn abort_interrupted_submit(
        &self,
        state: &mut RunState,
        submission: &SpotSubmission,
        err: &P::Error,
    ) -> LaunchError<P::Error> {
        tracing::warn!(error = %err, "submission failed during interrupt; recovering request ids");
        if let Err(retry) = submit(&self.provider, submission, state).await {
            tracing::warn!(error = %retry, "could not recover request ids after interrupt");
        }
        self.abort(state).await
    }

    async fn fail(&self, state: &mut RunState, err: PollError<P::Error>) -> LaunchError<P::Error> {
        if self.token.is_cancelled() {
            if let PollError::Provider { context, source } = &err {
                tracing::warn!(error = %source, context, "provider call failed during interrupt");
            }
            return self.abort(state).await;
        }
        match err {
            PollError::Cancelled => self.abort(state).await,
            PollError::Provider { context, source } => {
                tracing::warn!(error = %source, context, "provider call failed; cleaning up");
                let cleanup = CancellationHandler::new(&self.provider).cleanup(state).await;
                let message = append_teardown_note(
                    format!("provider call failed while {context}: {source}"),
                    &cleanup,
                );
                LaunchError::Provider {
                    message,
                    source,
                    cleanup,
                }
            }
        }
    }
}
