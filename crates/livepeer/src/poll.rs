//! Drives one job from submission to a terminal state.
//!
//! A [`PollTask`] submits the job to the remote side, marks it running,
//! then polls its status until the remote side reports a terminal state.
//! Every remote call goes through [`PollTask::call_with_retry`], which
//! retries transient errors with exponential backoff.
//!
//! Before every attempt the task checks, in order: cancellation, whether
//! the job is still tracked by the service, and the overall deadline. A
//! cancelled or reclaimed job is abandoned without any further write.
//! Whatever the outcome, a submitted job is handed back to
//! [`RemoteJobApi::discard`] once the task is done with it.

use std::future::Future;
use std::time::Duration;

use jobrelay_core::{JobId, JobKind, RequestOptions};
use jobrelay_jobs::{JobFailure, JobService};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{JobPayload, RemoteError, RemoteJobApi, RemoteJobId, RemoteStatus};

/// Stand-in deadline for timeouts too large to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of one remote call after retries.
#[derive(Debug)]
pub(crate) enum CallOutcome<T> {
    Ok(T),
    /// The job must fail with this error.
    Failed(JobFailure),
    /// Cancelled or reclaimed; stop without writing.
    Abandoned,
}

/// Background unit bound to exactly one job id.
pub struct PollTask {
    job_id: JobId,
    kind: JobKind,
    options: RequestOptions,
    deadline: Instant,
    cancel: CancellationToken,
}

impl PollTask {
    /// `started` is the moment the request was made; the overall timeout
    /// counts from there.
    pub fn new(
        job_id: JobId,
        kind: JobKind,
        options: RequestOptions,
        started: Instant,
        cancel: CancellationToken,
    ) -> Self {
        let deadline = deadline_after(started, options.timeout);
        Self {
            job_id,
            kind,
            options,
            deadline,
            cancel,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Run the job to completion, recording the outcome in `service`.
    ///
    /// Transition errors are logged by the service and otherwise ignored:
    /// they only mean the job was reclaimed or already terminal.
    pub async fn run(&self, service: &JobService, api: &dyn RemoteJobApi, payload: &JobPayload) {
        let remote_id = match self
            .call_with_retry(service, "submit", || api.submit(self.kind, payload))
            .await
        {
            CallOutcome::Ok(remote_id) => remote_id,
            CallOutcome::Failed(failure) => {
                let _ = service.mark_failed(self.job_id, failure);
                return;
            }
            CallOutcome::Abandoned => return,
        };

        tracing::debug!(job_id = %self.job_id, remote_id = %remote_id, "Remote job submitted");
        self.follow(service, api, &remote_id).await;
        api.discard(&remote_id).await;
    }

    /// Poll a submitted job until it is terminal, failed or abandoned.
    async fn follow(&self, service: &JobService, api: &dyn RemoteJobApi, remote_id: &RemoteJobId) {
        if service.mark_running(self.job_id).is_err() {
            return;
        }

        loop {
            let status = match self
                .call_with_retry(service, "poll_status", || api.poll_status(remote_id))
                .await
            {
                CallOutcome::Ok(status) => status,
                CallOutcome::Failed(failure) => {
                    let _ = service.mark_failed(self.job_id, failure);
                    return;
                }
                CallOutcome::Abandoned => return,
            };

            match status {
                RemoteStatus::Completed(raw) => {
                    let _ = service.mark_completed(self.job_id, raw);
                    return;
                }
                RemoteStatus::Failed(message) => {
                    let _ = service.mark_failed(self.job_id, JobFailure::remote(message));
                    return;
                }
                RemoteStatus::Pending | RemoteStatus::Running => {
                    if !self.pause(self.options.poll_interval).await {
                        return;
                    }
                }
            }
        }
    }

    /// Call `op` until it succeeds, fails fatally, runs out of retries or
    /// the job is abandoned.
    pub(crate) async fn call_with_retry<T, F, Fut>(
        &self,
        service: &JobService,
        op_name: &'static str,
        mut op: F,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut backoff = self.options.backoff();
        let mut attempt = 0u32;

        loop {
            if let Some(outcome) = self.gate(service) {
                return outcome;
            }

            attempt += 1;
            match op().await {
                Ok(value) => return CallOutcome::Ok(value),
                Err(RemoteError::Fatal(message)) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        op = op_name,
                        attempt,
                        error = %message,
                        "Remote call failed",
                    );
                    return CallOutcome::Failed(JobFailure::remote(message));
                }
                Err(RemoteError::Transient(message)) => match backoff.next_retry() {
                    Some(delay) => {
                        tracing::warn!(
                            job_id = %self.job_id,
                            op = op_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Transient remote error, retrying",
                        );
                        if !self.pause(delay).await {
                            return CallOutcome::Abandoned;
                        }
                    }
                    None => {
                        return CallOutcome::Failed(JobFailure::retries_exhausted(attempt, message));
                    }
                },
            }
        }
    }

    /// Checks made before every attempt. `None` means go ahead.
    fn gate<T>(&self, service: &JobService) -> Option<CallOutcome<T>> {
        if self.cancel.is_cancelled() {
            tracing::debug!(job_id = %self.job_id, "Poll task cancelled");
            return Some(CallOutcome::Abandoned);
        }
        if !service.contains(self.job_id) {
            tracing::debug!(job_id = %self.job_id, "Job reclaimed, poll task exiting");
            return Some(CallOutcome::Abandoned);
        }
        if Instant::now() >= self.deadline {
            return Some(CallOutcome::Failed(JobFailure::timeout(self.options.timeout)));
        }
        None
    }

    /// Sleep for `delay`, cut short at the deadline. Returns `false` when
    /// cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        let delay = delay.min(self.deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// `started + timeout`, saturating at a point far enough ahead to never
/// fire in practice.
fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started)
}
