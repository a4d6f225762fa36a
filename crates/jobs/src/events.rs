//! Lifecycle events emitted by the job service.
//!
//! Delivered over a [`tokio::sync::broadcast`] channel; call
//! [`JobService::subscribe`](crate::service::JobService::subscribe) to
//! receive them. Slow subscribers observe `RecvError::Lagged` rather
//! than slowing the service down.

use jobrelay_core::{JobId, JobKind};
use serde::Serialize;

use crate::state::FailureKind;

/// Broadcast channel capacity for job events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A state change of a tracked job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was registered in `Pending` state.
    Registered { job_id: JobId, kind: JobKind },

    /// The remote side accepted the job.
    Running { job_id: JobId },

    /// The job completed and its raw result is available.
    Completed { job_id: JobId },

    /// The job failed.
    Failed { job_id: JobId, kind: FailureKind },

    /// The sweeper removed the job from the table.
    Reclaimed { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Registered { job_id, .. }
            | JobEvent::Running { job_id }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Reclaimed { job_id } => *job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let job_id = JobId::new();
        let json = serde_json::to_value(JobEvent::Failed {
            job_id,
            kind: FailureKind::Timeout,
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["job_id"], job_id.to_string());
    }
}
