//! End-to-end tests: requester, job service and getters together.
//!
//! A minimal in-memory remote API stands in for the gateway so that the
//! getter's view of an async job can be followed from submission to
//! reclamation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobrelay_core::{JobKind, RequestOptions};
use jobrelay_getter::{ChangeToken, Fetch, Getter, ImageConverter, TextConverter};
use jobrelay_jobs::{JobService, JobStatus, ServiceConfig};
use jobrelay_livepeer::{
    JobPayload, RemoteError, RemoteJobApi, RemoteJobId, RemoteStatus, Requester, RequesterConfig,
};
use serde_json::{json, Value};

/// Reports `Running` for the first `running_polls` polls, then completes
/// with `result`.
struct SlowApi {
    running_polls: u32,
    polls: AtomicU32,
    result: Value,
}

impl SlowApi {
    fn new(running_polls: u32, result: Value) -> Self {
        Self {
            running_polls,
            polls: AtomicU32::new(0),
            result,
        }
    }
}

#[async_trait]
impl RemoteJobApi for SlowApi {
    async fn submit(&self, _kind: JobKind, _payload: &JobPayload) -> Result<RemoteJobId, RemoteError> {
        Ok(RemoteJobId::new("remote-1"))
    }

    async fn poll_status(&self, _remote_id: &RemoteJobId) -> Result<RemoteStatus, RemoteError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        if n < self.running_polls {
            Ok(RemoteStatus::Running)
        } else {
            Ok(RemoteStatus::Completed(self.result.clone()))
        }
    }
}

fn image_result() -> Value {
    json!({"images": [{"url": "https://cdn/out.png", "seed": 11, "nsfw": false}]})
}

// ---------------------------------------------------------------------------
// Test: async job observed through a getter
// ---------------------------------------------------------------------------

/// Tokens are fresh while the background task runs and settle on
/// `Stable(job_id)` once it completes; fetch then yields the output.
#[tokio::test(start_paused = true)]
async fn async_job_tokens_settle_when_complete() {
    let service = JobService::new(ServiceConfig::default());
    let api = Arc::new(SlowApi::new(3, image_result()));
    let requester = Requester::new(Arc::clone(&service), api, RequesterConfig::default());

    let job_id = requester
        .submit(
            JobKind::TextToImage,
            JobPayload::new().with_param("prompt", "a fox"),
            &RequestOptions::asynchronous(),
        )
        .await;
    assert_eq!(service.get_state(job_id), Ok(JobStatus::Pending));

    let mut getter = Getter::new(Arc::clone(&service), ImageConverter);
    getter.bind(job_id);

    let mut seen = Vec::new();
    let stable = loop {
        let token = getter.change_signal();
        if token.is_stable() {
            break token;
        }
        assert!(!seen.contains(&token), "volatile token repeated");
        seen.push(token);
        assert!(!getter.fetch().is_ready());
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    assert_eq!(stable, ChangeToken::Stable(job_id));
    assert_eq!(getter.change_signal(), stable);
    assert!(seen.len() >= 2);

    let Fetch::Ready(output) = getter.fetch() else {
        panic!("expected converted output");
    };
    assert_eq!(output.images[0].url, "https://cdn/out.png");
    assert_eq!(output.images[0].seed, Some(11));
}

// ---------------------------------------------------------------------------
// Test: shared job
// ---------------------------------------------------------------------------

/// Two getters bound to one job: releasing one keeps the other's fetch
/// intact, and only after both release does a sweep reclaim the job.
#[tokio::test]
async fn shared_job_is_reclaimed_after_both_release() {
    let service = JobService::new(ServiceConfig::default());
    let api = Arc::new(SlowApi::new(0, json!({"text": "a red barn"})));
    let requester = Requester::new(Arc::clone(&service), api, RequesterConfig::default());

    let job_id = requester
        .submit(JobKind::ImageToText, JobPayload::new(), &RequestOptions::sync())
        .await;
    assert_eq!(service.get_state(job_id), Ok(JobStatus::Completed));

    let mut first = Getter::new(Arc::clone(&service), TextConverter);
    let mut second = Getter::new(Arc::clone(&service), TextConverter);
    first.bind(job_id);
    second.bind(job_id);
    assert!(first.fetch().is_ready());

    first.unbind();
    assert!(service.sweep().is_empty());
    assert_eq!(
        second.fetch(),
        Fetch::Ready(jobrelay_getter::TextOutput {
            text: "a red barn".to_string()
        })
    );

    drop(second);
    assert_eq!(service.sweep(), vec![job_id]);
    assert!(!service.contains(job_id));
}

/// A sync result nobody has bound yet survives a sweep.
#[tokio::test]
async fn unclaimed_sync_result_survives_sweep() {
    let service = JobService::new(ServiceConfig::default());
    let api = Arc::new(SlowApi::new(0, image_result()));
    let requester = Requester::new(Arc::clone(&service), api, RequesterConfig::default());

    let job_id = requester
        .submit(JobKind::TextToImage, JobPayload::new(), &RequestOptions::sync())
        .await;

    assert!(service.sweep().is_empty());
    let mut getter = Getter::new(Arc::clone(&service), ImageConverter);
    getter.bind(job_id);
    assert!(getter.fetch().is_ready());
}
