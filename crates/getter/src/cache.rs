//! Processed-result cache.
//!
//! Holds the converted output (or the conversion error) of a completed
//! job per `(job, consumer)` pair, so repeated fetches skip both the job
//! service and the conversion. Several getters may share one cache.
//!
//! Every insert bumps a logical version so callers can tell whether
//! anything was processed since they last looked. Entries of reclaimed
//! jobs are dropped by [`ProcessedResultCache::spawn_pruner`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jobrelay_core::{ConsumerId, JobId};
use jobrelay_jobs::{JobEvent, JobService};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::convert::ConversionError;

/// Cached outcome of converting one job's result.
pub type CachedOutput<T> = Result<T, ConversionError>;

pub struct ProcessedResultCache<T> {
    entries: Mutex<HashMap<(JobId, ConsumerId), CachedOutput<T>>>,
    version: AtomicU64,
}

impl<T: Clone> ProcessedResultCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
        }
    }

    pub fn get(&self, job_id: JobId, consumer: ConsumerId) -> Option<CachedOutput<T>> {
        self.lock().get(&(job_id, consumer)).cloned()
    }

    /// Store a processed result and return the version it was stored at.
    pub fn insert(&self, job_id: JobId, consumer: ConsumerId, output: CachedOutput<T>) -> u64 {
        let mut entries = self.lock();
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert((job_id, consumer), output);
        version
    }

    /// Latest version handed out; `0` until the first insert.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn remove(&self, job_id: JobId, consumer: ConsumerId) -> bool {
        self.lock().remove(&(job_id, consumer)).is_some()
    }

    /// Drop the entries of every consumer of `job_id`.
    pub fn remove_job(&self, job_id: JobId) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(id, _), _| *id != job_id);
        before - entries.len()
    }

    /// Drop every entry whose job the service no longer tracks. Returns
    /// the number of entries removed.
    pub fn prune(&self, service: &JobService) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(job_id, _), _| service.contains(*job_id));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "Pruned processed results");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(JobId, ConsumerId), CachedOutput<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + Sync + 'static> ProcessedResultCache<T> {
    /// Follow `service` events and drop the entries of reclaimed jobs
    /// until `cancel` is triggered. Missed events fall back to a full
    /// [`prune`](Self::prune).
    pub async fn run_pruner(self: Arc<Self>, service: Arc<JobService>, cancel: CancellationToken) {
        let mut events = service.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(JobEvent::Reclaimed { job_id }) => {
                        self.remove_job(job_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Result cache lagged behind job events, pruning");
                        self.prune(&service);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    /// Spawn [`run_pruner`](Self::run_pruner) on the current tokio runtime.
    pub fn spawn_pruner(
        self: &Arc<Self>,
        service: &Arc<JobService>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_pruner(Arc::clone(service), cancel))
    }
}

impl<T: Clone> Default for ProcessedResultCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
