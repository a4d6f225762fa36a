//! Job submission front door.
//!
//! [`Requester`] registers a job with the shared [`JobService`] and drives
//! it through a [`PollTask`], either on the caller's task (sync mode) or on
//! a spawned background task (async mode). It never stores job data
//! itself; callers observe progress through the service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jobrelay_core::{ExecutionMode, JobId, JobKind, RelayConfig, RequestOptions};
use jobrelay_jobs::{JobFailure, JobService};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{JobPayload, RemoteJobApi};
use crate::poll::PollTask;

/// Default bound on concurrently running background polls.
pub const DEFAULT_MAX_CONCURRENT_POLLS: usize = 8;

#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Background poll tasks allowed to run at once; further tasks wait
    /// for a permit.
    pub max_concurrent_polls: usize,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_polls: DEFAULT_MAX_CONCURRENT_POLLS,
        }
    }
}

impl From<&RelayConfig> for RequesterConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_concurrent_polls: config.max_concurrent_polls.max(1),
        }
    }
}

type PollRegistry = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Submits remote jobs and records their outcome in the job service.
///
/// Cheap to share behind an `Arc`. Dropping the requester does not stop
/// background polls; call [`shutdown`](Self::shutdown) for that.
pub struct Requester {
    service: Arc<JobService>,
    api: Arc<dyn RemoteJobApi>,
    permits: Arc<Semaphore>,
    /// Live background polls, each with a child of the master token.
    polls: PollRegistry,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl Requester {
    pub fn new(
        service: Arc<JobService>,
        api: Arc<dyn RemoteJobApi>,
        config: RequesterConfig,
    ) -> Self {
        let max_concurrent_polls = config.max_concurrent_polls.max(1);
        tracing::info!(max_concurrent_polls, "Requester initialized");
        Self {
            service,
            api,
            permits: Arc::new(Semaphore::new(max_concurrent_polls)),
            polls: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn service(&self) -> &Arc<JobService> {
        &self.service
    }

    /// Register a job and run it according to `options.mode`.
    ///
    /// In sync mode this returns once the job is terminal. In async mode
    /// it returns right after registration while the job is still
    /// `Pending`. Errors never escape; inspect the job through the service.
    pub async fn submit(
        &self,
        kind: JobKind,
        payload: JobPayload,
        options: &RequestOptions,
    ) -> JobId {
        let started = Instant::now();
        let job_id = self.service.register(kind);
        tracing::info!(job_id = %job_id, kind = %kind, mode = %options.mode, "Job submitted");

        if let Err(e) = options.validate() {
            let _ = self.service.mark_failed(
                job_id,
                JobFailure::remote(format!("Invalid request options: {e}")),
            );
            return job_id;
        }

        if self.cancel.is_cancelled() {
            let _ = self
                .service
                .mark_failed(job_id, JobFailure::remote("Requester is shut down"));
            return job_id;
        }

        match options.mode {
            ExecutionMode::Sync => {
                let task = PollTask::new(
                    job_id,
                    kind,
                    options.clone(),
                    started,
                    self.cancel.child_token(),
                );
                task.run(&self.service, self.api.as_ref(), &payload).await;
            }
            ExecutionMode::Async => self.spawn_poll(job_id, kind, payload, options.clone(), started),
        }
        job_id
    }

    /// Number of background polls that have not finished yet, including
    /// those waiting for a permit.
    pub fn active_polls(&self) -> usize {
        lock(&self.polls).len()
    }

    /// Cancel every background poll. Jobs they were driving are left in
    /// their current state.
    pub fn shutdown(&self) {
        tracing::info!(active_polls = self.active_polls(), "Shutting down requester");
        self.cancel.cancel();
        for (_, token) in lock(&self.polls).drain() {
            token.cancel();
        }
    }

    // ---- private helpers ----

    fn spawn_poll(
        &self,
        job_id: JobId,
        kind: JobKind,
        payload: JobPayload,
        options: RequestOptions,
        started: Instant,
    ) {
        let cancel = self.cancel.child_token();
        lock(&self.polls).insert(job_id, cancel.clone());

        let service = Arc::clone(&self.service);
        let api = Arc::clone(&self.api);
        let permits = Arc::clone(&self.permits);
        let guard = PollGuard {
            job_id,
            polls: Arc::clone(&self.polls),
        };

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            tracing::debug!(job_id = %job_id, "Background poll started");
            let task = PollTask::new(job_id, kind, options, started, cancel);
            task.run(&service, api.as_ref(), &payload).await;
            tracing::debug!(job_id = %job_id, "Background poll exited");
        });
    }
}

/// Removes a finished poll from the registry, however the task ends.
struct PollGuard {
    job_id: JobId,
    polls: PollRegistry,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        lock(&self.polls).remove(&self.job_id);
    }
}

fn lock(polls: &PollRegistry) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
    polls.lock().unwrap_or_else(PoisonError::into_inner)
}
