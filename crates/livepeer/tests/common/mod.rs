//! Shared test fixtures: a scripted in-memory remote API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use jobrelay_core::{JobId, JobKind};
use jobrelay_jobs::JobEvent;
use jobrelay_livepeer::{JobPayload, RemoteError, RemoteJobApi, RemoteJobId, RemoteStatus};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Remote API that replays scripted responses in order.
///
/// Once a script is exhausted, `submit` succeeds and `poll_status`
/// reports `Running` forever.
#[derive(Default)]
pub struct ScriptedApi {
    submits: Mutex<VecDeque<Result<RemoteJobId, RemoteError>>>,
    polls: Mutex<VecDeque<Result<RemoteStatus, RemoteError>>>,
    submit_calls: AtomicU32,
    poll_calls: AtomicU32,
    submit_times: Mutex<Vec<Instant>>,
    discarded: Mutex<Vec<RemoteJobId>>,
    submit_delay: Duration,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submits(self, script: Vec<Result<RemoteJobId, RemoteError>>) -> Self {
        *self.submits.lock().unwrap() = script.into();
        self
    }

    pub fn with_polls(self, script: Vec<Result<RemoteStatus, RemoteError>>) -> Self {
        *self.polls.lock().unwrap() = script.into();
        self
    }

    /// Make every submit take `delay` before answering.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// Remote ids handed back through `discard`, in order.
    pub fn discarded(&self) -> Vec<RemoteJobId> {
        self.discarded.lock().unwrap().clone()
    }

    /// Gaps between consecutive submit attempts.
    pub fn submit_gaps(&self) -> Vec<Duration> {
        let times = self.submit_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl RemoteJobApi for ScriptedApi {
    async fn submit(&self, _kind: JobKind, _payload: &JobPayload) -> Result<RemoteJobId, RemoteError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.submit_times.lock().unwrap().push(Instant::now());
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RemoteJobId::new(format!("remote-{n}"))))
    }

    async fn poll_status(&self, _remote_id: &RemoteJobId) -> Result<RemoteStatus, RemoteError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(RemoteStatus::Running))
    }

    async fn discard(&self, remote_id: &RemoteJobId) {
        self.discarded.lock().unwrap().push(remote_id.clone());
    }
}

/// Wait for the next event of `job_id` matching `pred`.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: JobId,
    pred: F,
) -> JobEvent
where
    F: Fn(&JobEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if event.job_id() == job_id && pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for job event")
}

pub fn is_terminal_event(event: &JobEvent) -> bool {
    matches!(event, JobEvent::Completed { .. } | JobEvent::Failed { .. })
}
