//! Periodic reclamation of abandoned jobs.
//!
//! Spawns a background task that calls [`JobService::sweep`] on a fixed
//! interval using `tokio::time::interval`, so memory held by jobs whose
//! consumers went away stays bounded without any caller driving it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::service::JobService;

/// `tokio::time::interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(service: Arc<JobService>, cancel: CancellationToken) {
    let period = service.config().sweep_interval.max(MIN_PERIOD);
    tracing::info!(interval_ms = period.as_millis() as u64, "Job sweeper started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let reclaimed = service.sweep();
                if reclaimed.is_empty() {
                    tracing::debug!(tracked = service.len(), "Job sweep: nothing to reclaim");
                }
            }
        }
    }
}

impl JobService {
    /// Spawn [`run`] on the current tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(run(Arc::clone(self), cancel))
    }
}
