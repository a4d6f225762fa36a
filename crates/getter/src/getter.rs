//! Consumer side of a job.
//!
//! A [`Getter`] is bound to at most one job at a time. It tells the host's
//! re-execution driver whether it needs to run again
//! ([`change_signal`](Getter::change_signal)) and turns the job's raw
//! result into a typed output ([`fetch`](Getter::fetch)). It never
//! blocks waiting for a job.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jobrelay_core::{ConsumerId, JobId};
use jobrelay_jobs::{FailureKind, JobResult, JobService, JobStatus};
use serde::Serialize;

use crate::cache::{CachedOutput, ProcessedResultCache};
use crate::convert::Converter;
use crate::token::ChangeToken;

/// Why a fetch produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GetterFailureKind {
    /// The remote side rejected the job or reported it failed.
    Remote,
    RetriesExhausted,
    Timeout,
    /// The job completed but its result could not be converted.
    Conversion,
    /// The bound job belongs to a different output family.
    TypeMismatch,
    /// The job was reclaimed or never existed.
    UnknownJob,
    /// No job is bound.
    Unbound,
}

impl From<FailureKind> for GetterFailureKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Remote => GetterFailureKind::Remote,
            FailureKind::RetriesExhausted => GetterFailureKind::RetriesExhausted,
            FailureKind::Timeout => GetterFailureKind::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetterFailure {
    pub kind: GetterFailureKind,
    pub message: String,
}

impl GetterFailure {
    fn new(kind: GetterFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for GetterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Answer to [`Getter::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    Ready(T),
    /// The job is still `Pending` or `Running`.
    NotReady(JobStatus),
    Failed(GetterFailure),
}

impl<T> Fetch<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Fetch::Ready(_))
    }
}

/// Consumer of one job's result, converting it with `C`.
pub struct Getter<C: Converter> {
    id: ConsumerId,
    service: Arc<JobService>,
    converter: C,
    cache: Arc<ProcessedResultCache<C::Output>>,
    bound: Option<JobId>,
    seq: AtomicU64,
}

impl<C: Converter> Getter<C> {
    /// Create a getter with its own processed-result cache.
    pub fn new(service: Arc<JobService>, converter: C) -> Self {
        Self::with_cache(service, converter, Arc::new(ProcessedResultCache::new()))
    }

    /// Create a getter that stores processed results in a shared cache.
    pub fn with_cache(
        service: Arc<JobService>,
        converter: C,
        cache: Arc<ProcessedResultCache<C::Output>>,
    ) -> Self {
        Self {
            id: ConsumerId::new(),
            service,
            converter,
            cache,
            bound: None,
            seq: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn bound_job(&self) -> Option<JobId> {
        self.bound
    }

    /// Bind to `job_id`, releasing any previously bound job.
    ///
    /// An unknown id is still recorded; [`fetch`](Self::fetch) then
    /// reports it.
    pub fn bind(&mut self, job_id: JobId) {
        if self.bound == Some(job_id) {
            return;
        }
        self.unbind();
        self.bound = Some(job_id);
        if self.service.associate(job_id, self.id).is_ok() {
            tracing::debug!(consumer = %self.id, job_id = %job_id, "Getter bound");
        }
    }

    /// Release the bound job and forget its processed result.
    pub fn unbind(&mut self) {
        let Some(job_id) = self.bound.take() else {
            return;
        };
        self.cache.remove(job_id, self.id);
        if self.service.release(job_id, self.id).is_ok() {
            tracing::debug!(consumer = %self.id, job_id = %job_id, "Getter unbound");
        }
    }

    /// Token the re-execution driver compares across cycles.
    ///
    /// Fresh on every call while unbound or while the job is still in
    /// flight; `Stable(job_id)` once the job is terminal or gone.
    pub fn change_signal(&self) -> ChangeToken {
        let Some(job_id) = self.bound else {
            return self.volatile();
        };
        match self.service.get_state(job_id) {
            Ok(status) if !status.is_terminal() => self.volatile(),
            _ => ChangeToken::Stable(job_id),
        }
    }

    /// Current output of the bound job. Never blocks.
    pub fn fetch(&self) -> Fetch<C::Output> {
        let Some(job_id) = self.bound else {
            return Fetch::Failed(GetterFailure::new(
                GetterFailureKind::Unbound,
                "No job is bound",
            ));
        };

        if let Some(cached) = self.cache.get(job_id, self.id) {
            return from_cached(cached);
        }

        let (result, kind) = match self
            .service
            .get_result(job_id)
            .and_then(|result| Ok((result, self.service.kind(job_id)?)))
        {
            Ok(found) => found,
            Err(_) => {
                return Fetch::Failed(GetterFailure::new(
                    GetterFailureKind::UnknownJob,
                    format!("Job {job_id} not found"),
                ));
            }
        };

        match result {
            JobResult::NotReady(status) => Fetch::NotReady(status),
            JobResult::Failed(failure) => Fetch::Failed(GetterFailure::new(
                failure.kind.into(),
                failure.message,
            )),
            JobResult::Completed(raw) => {
                if !self.converter.accepts(kind) {
                    tracing::warn!(
                        consumer = %self.id,
                        job_id = %job_id,
                        kind = %kind,
                        expected = %self.converter.family(),
                        "Job kind does not match getter",
                    );
                    return Fetch::Failed(GetterFailure::new(
                        GetterFailureKind::TypeMismatch,
                        format!(
                            "Job {job_id} has kind {kind}, expected {} output",
                            self.converter.family()
                        ),
                    ));
                }

                let output = self.converter.convert(kind, &raw);
                if let Err(e) = &output {
                    tracing::warn!(consumer = %self.id, job_id = %job_id, error = %e, "Result conversion failed");
                }
                self.cache.insert(job_id, self.id, output.clone());
                from_cached(output)
            }
        }
    }

    fn volatile(&self) -> ChangeToken {
        ChangeToken::Volatile(self.seq.fetch_add(1, Ordering::Relaxed))
    }
}

impl<C: Converter> Drop for Getter<C> {
    fn drop(&mut self) {
        self.unbind();
    }
}

fn from_cached<T>(cached: CachedOutput<T>) -> Fetch<T> {
    match cached {
        Ok(output) => Fetch::Ready(output),
        Err(e) => Fetch::Failed(GetterFailure::new(GetterFailureKind::Conversion, e.to_string())),
    }
}
