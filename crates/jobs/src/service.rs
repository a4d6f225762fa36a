//! Process-wide job table.
//!
//! [`JobService`] owns every [`JobRecord`] and the consumer associations
//! attached to them. It is created once at startup and shared as an
//! `Arc<JobService>`; tests build isolated instances.
//!
//! All operations are synchronous and take the table lock only for the
//! duration of the access, so they are safe to call from the host's
//! evaluation thread as well as from async tasks. The lock is never held
//! across an `.await` or a remote call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use jobrelay_core::{ConsumerId, JobId, JobKind, RelayConfig, Timestamp};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::events::{JobEvent, EVENT_CHANNEL_CAPACITY};
use crate::state::{JobFailure, JobResult, JobState, JobStatus};

/// Reclamation timings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Period of the background sweeper.
    pub sweep_interval: Duration,
    /// How long a terminal job that no consumer ever bound is kept.
    pub unclaimed_ttl: Duration,
    /// Maximum age of a consumer-less job that never reached a terminal
    /// state.
    pub stale_pending_after: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            unclaimed_ttl: Duration::from_secs(3600),
            stale_pending_after: Duration::from_secs(3600),
        }
    }
}

impl From<&RelayConfig> for ServiceConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            sweep_interval: config.sweep_interval,
            unclaimed_ttl: config.unclaimed_ttl,
            stale_pending_after: config.stale_pending_after,
        }
    }
}

/// Errors returned by the job table. Both indicate a caller bug or a
/// race with reclamation; they are logged where detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobServiceError {
    /// The id was reclaimed or never registered.
    #[error("Job {0} not found")]
    UnknownJob(JobId),

    /// The requested state change violates the lifecycle.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// One tracked job.
#[derive(Debug)]
struct JobRecord {
    kind: JobKind,
    state: JobState,
    created_at: Timestamp,
    completed_at: Option<Timestamp>,
    registered: Instant,
    finished: Option<Instant>,
    consumers: HashSet<ConsumerId>,
    ever_associated: bool,
}

impl JobRecord {
    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            state: JobState::Pending,
            created_at: Utc::now(),
            completed_at: None,
            registered: Instant::now(),
            finished: None,
            consumers: HashSet::new(),
            ever_associated: false,
        }
    }

    fn is_reclaimable(&self, now: Instant, config: &ServiceConfig) -> bool {
        if !self.consumers.is_empty() {
            return false;
        }
        match self.finished {
            Some(_) if self.ever_associated => true,
            Some(finished) => now.duration_since(finished) >= config.unclaimed_ttl,
            None => now.duration_since(self.registered) >= config.stale_pending_after,
        }
    }
}

/// Copy of a job's diagnostic fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub consumer_count: usize,
}

/// Thread-safe registry of in-flight and completed jobs.
pub struct JobService {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    config: ServiceConfig,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobService {
    pub fn new(config: ServiceConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        tracing::info!(
            sweep_interval_secs = config.sweep_interval.as_secs(),
            unclaimed_ttl_secs = config.unclaimed_ttl.as_secs(),
            stale_pending_secs = config.stale_pending_after.as_secs(),
            "Job service initialized",
        );
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            config,
            event_tx,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Create a `Pending` job and return its fresh id.
    pub fn register(&self, kind: JobKind) -> JobId {
        let job_id = JobId::new();
        self.lock().insert(job_id, JobRecord::new(kind));

        tracing::debug!(job_id = %job_id, kind = %kind, "Job registered");
        self.publish(JobEvent::Registered { job_id, kind });
        job_id
    }

    pub fn mark_running(&self, job_id: JobId) -> Result<(), JobServiceError> {
        self.transition(job_id, JobState::Running)?;
        self.publish(JobEvent::Running { job_id });
        Ok(())
    }

    pub fn mark_completed(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<(), JobServiceError> {
        self.transition(
            job_id,
            JobState::Completed {
                result: Arc::new(result),
            },
        )?;
        tracing::info!(job_id = %job_id, "Job completed");
        self.publish(JobEvent::Completed { job_id });
        Ok(())
    }

    pub fn mark_failed(&self, job_id: JobId, error: JobFailure) -> Result<(), JobServiceError> {
        let kind = error.kind;
        let message = error.message.clone();
        self.transition(job_id, JobState::Failed { error })?;
        tracing::warn!(job_id = %job_id, failure = %kind, error = %message, "Job failed");
        self.publish(JobEvent::Failed { job_id, kind });
        Ok(())
    }

    pub fn get_state(&self, job_id: JobId) -> Result<JobStatus, JobServiceError> {
        self.lock()
            .get(&job_id)
            .map(|record| record.state.status())
            .ok_or(JobServiceError::UnknownJob(job_id))
    }

    pub fn get_result(&self, job_id: JobId) -> Result<JobResult, JobServiceError> {
        self.lock()
            .get(&job_id)
            .map(|record| JobResult::from(&record.state))
            .ok_or(JobServiceError::UnknownJob(job_id))
    }

    pub fn kind(&self, job_id: JobId) -> Result<JobKind, JobServiceError> {
        self.lock()
            .get(&job_id)
            .map(|record| record.kind)
            .ok_or(JobServiceError::UnknownJob(job_id))
    }

    pub fn snapshot(&self, job_id: JobId) -> Result<JobSnapshot, JobServiceError> {
        self.lock()
            .get(&job_id)
            .map(|record| JobSnapshot {
                job_id,
                kind: record.kind,
                status: record.state.status(),
                created_at: record.created_at,
                completed_at: record.completed_at,
                consumer_count: record.consumers.len(),
            })
            .ok_or(JobServiceError::UnknownJob(job_id))
    }

    /// Whether the job is still tracked. Poll tasks check this once per
    /// iteration and stop when the job was reclaimed.
    pub fn contains(&self, job_id: JobId) -> bool {
        self.lock().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Attach a consumer to a job. Idempotent.
    pub fn associate(&self, job_id: JobId, consumer: ConsumerId) -> Result<(), JobServiceError> {
        let mut jobs = self.lock();
        let Some(record) = jobs.get_mut(&job_id) else {
            drop(jobs);
            tracing::warn!(job_id = %job_id, consumer = %consumer, "Associate on unknown job");
            return Err(JobServiceError::UnknownJob(job_id));
        };
        record.ever_associated = true;
        if record.consumers.insert(consumer) {
            tracing::debug!(
                job_id = %job_id,
                consumer = %consumer,
                consumers = record.consumers.len(),
                "Consumer associated",
            );
        }
        Ok(())
    }

    /// Detach a consumer from a job. Idempotent.
    ///
    /// Once the last consumer of a terminal job is gone, the next
    /// [`sweep`](Self::sweep) reclaims it.
    pub fn release(&self, job_id: JobId, consumer: ConsumerId) -> Result<(), JobServiceError> {
        let mut jobs = self.lock();
        let Some(record) = jobs.get_mut(&job_id) else {
            drop(jobs);
            tracing::debug!(job_id = %job_id, consumer = %consumer, "Release on unknown job");
            return Err(JobServiceError::UnknownJob(job_id));
        };
        if record.consumers.remove(&consumer) && record.consumers.is_empty() {
            tracing::debug!(
                job_id = %job_id,
                status = %record.state.status(),
                "Last consumer released job",
            );
        }
        Ok(())
    }

    /// Remove every reclaimable job and return the removed ids.
    ///
    /// Dropping the record drops the service's handle on the raw result.
    pub fn sweep(&self) -> Vec<JobId> {
        let now = Instant::now();
        let reclaimed: Vec<JobId> = {
            let mut jobs = self.lock();
            let ids: Vec<JobId> = jobs
                .iter()
                .filter(|(_, record)| record.is_reclaimable(now, &self.config))
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                if let Some(record) = jobs.remove(id) {
                    tracing::debug!(
                        job_id = %id,
                        kind = %record.kind,
                        status = %record.state.status(),
                        "Reclaiming job",
                    );
                }
            }
            ids
        };

        if !reclaimed.is_empty() {
            tracing::info!(reclaimed = reclaimed.len(), "Job sweep reclaimed jobs");
        }
        for job_id in &reclaimed {
            self.publish(JobEvent::Reclaimed { job_id: *job_id });
        }
        reclaimed
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        // Every critical section leaves the table consistent, so a panic
        // elsewhere does not invalidate it.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, job_id: JobId, next: JobState) -> Result<(), JobServiceError> {
        let to = next.status();
        let mut jobs = self.lock();
        let Some(record) = jobs.get_mut(&job_id) else {
            drop(jobs);
            tracing::warn!(job_id = %job_id, to = %to, "Transition on unknown job ignored");
            return Err(JobServiceError::UnknownJob(job_id));
        };

        let from = record.state.status();
        if !from.can_transition_to(to) {
            drop(jobs);
            tracing::error!(job_id = %job_id, from = %from, to = %to, "Invalid job transition ignored");
            return Err(JobServiceError::InvalidTransition { job_id, from, to });
        }

        if to.is_terminal() {
            record.completed_at = Some(Utc::now());
            record.finished = Some(Instant::now());
        }
        record.state = next;
        Ok(())
    }

    fn publish(&self, event: JobEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }
}
