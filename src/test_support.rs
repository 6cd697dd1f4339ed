//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::provider::{
    CommandOutput, CommandRunner, InstanceHealth, InstanceId, InstanceStatus, ProviderApi,
    ProviderFuture, RequestId, RequestState, RunnerError, SpotRequestStatus,
};
use crate::request::SpotSubmission;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic `aws` outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful response with the given JSON body.
    pub fn push_json(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// `None` values remove the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Error returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct FakeProviderError(pub String);

/// Provider call recorded by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// Batch submission with its instance count.
    Submit(u32),
    /// Request status query.
    DescribeRequests(Vec<RequestId>),
    /// Instance status query.
    DescribeInstances(Vec<InstanceId>),
    /// Request cancellation.
    Cancel(RequestId),
    /// Instance termination.
    Terminate(InstanceId),
}

#[derive(Debug, Default)]
struct FakeState {
    request_ids: Option<Vec<RequestId>>,
    rejection: Option<String>,
    submit_errors: VecDeque<String>,
    cancel_on_submit: Option<CancellationToken>,
    request_polls: VecDeque<Result<Vec<SpotRequestStatus>, String>>,
    last_requests: BTreeMap<RequestId, RequestState>,
    instance_polls: VecDeque<Result<Vec<InstanceStatus>, String>>,
    last_instances: BTreeMap<InstanceId, InstanceStatus>,
    failing_cancels: BTreeSet<RequestId>,
    failing_terminations: BTreeSet<InstanceId>,
    cancel_on_poll: Option<(usize, CancellationToken)>,
    polls_seen: usize,
    calls: Vec<ProviderCall>,
}

/// In-memory provider with scripted responses.
///
/// Request polls replay scripted snapshots in order and then keep
/// repeating the latest state of every request; requests never scripted
/// stay open. Instances without a scripted status are reported ready with
/// synthetic addresses (`203.0.113.N` public, `10.0.0.N` private).
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    /// Creates a provider that accepts any submission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the identifiers returned by the next submission.
    #[must_use]
    pub fn with_request_ids(self, ids: &[&str]) -> Self {
        lock(&self.state).request_ids = Some(ids.iter().copied().map(RequestId::from).collect());
        self
    }

    /// Makes submission fail with `message`.
    #[must_use]
    pub fn rejecting(self, message: &str) -> Self {
        lock(&self.state).rejection = Some(message.to_owned());
        self
    }

    /// Makes the next submission fail with `message` without recording
    /// any requests; later submissions behave normally.
    #[must_use]
    pub fn then_submit_error(self, message: &str) -> Self {
        lock(&self.state)
            .submit_errors
            .push_back(message.to_owned());
        self
    }

    /// Cancels `token` while answering the first submission, simulating an
    /// interrupt arriving while the request is in flight.
    #[must_use]
    pub fn cancel_on_submit(self, token: CancellationToken) -> Self {
        lock(&self.state).cancel_on_submit = Some(token);
        self
    }

    /// Queues one request poll response.
    #[must_use]
    pub fn then_requests(self, statuses: Vec<SpotRequestStatus>) -> Self {
        lock(&self.state).request_polls.push_back(Ok(statuses));
        self
    }

    /// Queues one failing request poll.
    #[must_use]
    pub fn then_request_error(self, message: &str) -> Self {
        lock(&self.state)
            .request_polls
            .push_back(Err(message.to_owned()));
        self
    }

    /// Queues one instance poll response.
    #[must_use]
    pub fn then_instances(self, statuses: Vec<InstanceStatus>) -> Self {
        lock(&self.state).instance_polls.push_back(Ok(statuses));
        self
    }

    /// Queues one failing instance poll.
    #[must_use]
    pub fn then_instance_error(self, message: &str) -> Self {
        lock(&self.state)
            .instance_polls
            .push_back(Err(message.to_owned()));
        self
    }

    /// Makes cancelling `id` fail.
    #[must_use]
    pub fn failing_cancel(self, id: &str) -> Self {
        lock(&self.state).failing_cancels.insert(RequestId::from(id));
        self
    }

    /// Makes terminating `id` fail.
    #[must_use]
    pub fn failing_termination(self, id: &str) -> Self {
        lock(&self.state)
            .failing_terminations
            .insert(InstanceId::from(id));
        self
    }

    /// Cancels `token` while answering the `poll`-th request poll
    /// (1-based), simulating an interrupt arriving mid-poll.
    #[must_use]
    pub fn cancel_on_request_poll(self, poll: usize, token: CancellationToken) -> Self {
        lock(&self.state).cancel_on_poll = Some((poll, token));
        self
    }

    /// Every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.state).calls.clone()
    }

    /// Requests cancelled so far, in call order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<RequestId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Cancel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Instances terminated so far, in call order.
    #[must_use]
    pub fn terminated(&self) -> Vec<InstanceId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn submit(&self, submission: &SpotSubmission) -> Result<Vec<RequestId>, FakeProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(ProviderCall::Submit(submission.instance_count));
        if let Some(token) = state.cancel_on_submit.take() {
            token.cancel();
        }
        if let Some(message) = state.submit_errors.pop_front() {
            return Err(FakeProviderError(message));
        }
        if let Some(message) = &state.rejection {
            return Err(FakeProviderError(message.clone()));
        }
        let ids = state.request_ids.clone().unwrap_or_else(|| {
            (1..=submission.instance_count)
                .map(|n| RequestId::from(format!("sir-{n}")))
                .collect()
        });
        for id in &ids {
            state.last_requests.insert(id.clone(), RequestState::Open);
        }
        Ok(ids)
    }

    fn describe_requests(
        &self,
        ids: &[RequestId],
    ) -> Result<Vec<SpotRequestStatus>, FakeProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(ProviderCall::DescribeRequests(ids.to_vec()));
        state.polls_seen += 1;
        if let Some((poll, token)) = &state.cancel_on_poll
            && *poll == state.polls_seen
        {
            token.cancel();
        }
        if let Some(next) = state.request_polls.pop_front() {
            for status in next.map_err(FakeProviderError)? {
                state.last_requests.insert(status.request_id, status.state);
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                state.last_requests.get(id).map(|request_state| SpotRequestStatus {
                    request_id: id.clone(),
                    state: request_state.clone(),
                })
            })
            .collect())
    }

    fn instance_statuses(
        &self,
        ids: &[InstanceId],
    ) -> Result<Vec<InstanceStatus>, FakeProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(ProviderCall::DescribeInstances(ids.to_vec()));
        if let Some(next) = state.instance_polls.pop_front() {
            for status in next.map_err(FakeProviderError)? {
                state.last_instances.insert(status.instance_id.clone(), status);
            }
        }
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if !state.last_instances.contains_key(id) {
                let synthetic = ready_instance(id.as_str(), state.last_instances.len() + 1);
                state.last_instances.insert(id.clone(), synthetic);
            }
            if let Some(status) = state.last_instances.get(id) {
                statuses.push(status.clone());
            }
        }
        Ok(statuses)
    }

    fn cancel(&self, id: &RequestId) -> Result<(), FakeProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(ProviderCall::Cancel(id.clone()));
        if state.failing_cancels.contains(id) {
            return Err(FakeProviderError(format!("cannot cancel {id}")));
        }
        if let Some(request_state) = state.last_requests.get_mut(id)
            && !request_state.is_terminal()
        {
            *request_state = cancelled("canceled-before-fulfillment");
        }
        Ok(())
    }

    fn terminate(&self, id: &InstanceId) -> Result<(), FakeProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(ProviderCall::Terminate(id.clone()));
        if state.failing_terminations.contains(id) {
            return Err(FakeProviderError(format!("cannot terminate {id}")));
        }
        if let Some(status) = state.last_instances.get_mut(id) {
            status.health = InstanceHealth::Terminated;
        }
        Ok(())
    }
}

impl ProviderApi for FakeProvider {
    type Error = FakeProviderError;

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
        Box::pin(async move { self.instance_statuses(ids) })
    }

    fn cancel_spot_request<'a>(
        &'a self,
        id: &'a RequestId,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.cancel(id) })
    }

    fn terminate_instance<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.terminate(id) })
    }
}

/// Request status: still open.
#[must_use]
pub fn open(request: &str) -> SpotRequestStatus {
    SpotRequestStatus {
        request_id: RequestId::from(request),
        state: RequestState::Open,
    }
}

/// Request status: fulfilled by `instance`.
#[must_use]
pub fn fulfilled(request: &str, instance: &str) -> SpotRequestStatus {
    SpotRequestStatus {
        request_id: RequestId::from(request),
        state: RequestState::Fulfilled {
            instance_id: InstanceId::from(instance),
        },
    }
}

/// Request status: held on `code`.
#[must_use]
pub fn unfulfillable(request: &str, code: &str) -> SpotRequestStatus {
    SpotRequestStatus {
        request_id: RequestId::from(request),
        state: RequestState::Unfulfillable {
            code: code.to_owned(),
            message: String::new(),
        },
    }
}

/// Request status: failed with `code`.
#[must_use]
pub fn failed(request: &str, code: &str) -> SpotRequestStatus {
    SpotRequestStatus {
        request_id: RequestId::from(request),
        state: RequestState::Failed {
            code: code.to_owned(),
            message: String::new(),
        },
    }
}

fn cancelled(code: &str) -> RequestState {
    RequestState::Cancelled {
        code: code.to_owned(),
        message: String::new(),
    }
}

/// Instance status with explicit health and addresses.
#[must_use]
pub fn instance(
    id: &str,
    health: InstanceHealth,
    public_ip: Option<&str>,
    private_ip: Option<&str>,
) -> InstanceStatus {
    InstanceStatus {
        instance_id: InstanceId::from(id),
        health,
        public_ip: public_ip.and_then(|ip| ip.parse().ok()),
        private_ip: private_ip.and_then(|ip| ip.parse().ok()),
    }
}

fn ready_instance(id: &str, n: usize) -> InstanceStatus {
    let octet = u8::try_from(n).unwrap_or(u8::MAX);
    InstanceStatus {
        instance_id: InstanceId::from(id),
        health: InstanceHealth::Ready,
        public_ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, octet))),
        private_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet))),
    }
}
