//! Initial batch submission.

use super::{LaunchWarning, RunPhase, RunState};
use crate::provider::{ProviderApi, RequestId};
use crate::request::SpotSubmission;

/// Submits `submission` as one batch and records the returned identifiers
/// as live.
///
/// Rejections are returned untouched so the provider's message reaches the
/// operator verbatim; nothing is retried. A response carrying a different
/// number of identifiers than requested is accepted and reported as a
/// warning.
///
/// # Errors
///
/// Returns the provider error when the submission is rejected.
pub async fn submit<P: ProviderApi + Sync>(
    provider: &P,
    submission: &SpotSubmission,
    state: &mut RunState,
) -> Result<(Vec<RequestId>, Option<LaunchWarning>), P::Error> {
    state.set_phase(RunPhase::Submitting);
    tracing::info!(
        count = submission.instance_count,
        price = %submission.spot_price,
        "submitting spot request"
    );
    let ids = provider.submit_spot_request(submission).await?;

    let warning = (u32::try_from(ids.len()).ok() != Some(submission.instance_count)).then(|| {
        tracing::warn!(
            requested = submission.instance_count,
            received = ids.len(),
            "provider returned an unexpected number of request ids"
        );
        LaunchWarning::UnexpectedRequestCount {
            requested: submission.instance_count,
            received: ids.len(),
        }
    });

    for id in &ids {
        tracing::info!(request_id = %id, "spot request submitted");
    }
    state.track(ids.iter().cloned());
    state.set_phase(RunPhase::AwaitingFulfilment);
    Ok((ids, warning))
}
