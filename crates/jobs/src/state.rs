//! Job lifecycle states.
//!
//! [`JobState`] carries the terminal payload inside its variant, so a
//! job can hold a result or an error but never both, and neither can be
//! replaced once the job is terminal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque remote payload, shared between readers without copying.
pub type RawResult = Arc<serde_json::Value>;

/// Coarse lifecycle status without the terminal payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `Pending -> Failed` covers a submission that never reached the
    /// remote side.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in [`JobStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote side rejected the job or reported it failed.
    Remote,
    /// Every retry of a transient error was used up.
    RetriesExhausted,
    /// The overall request deadline elapsed.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Remote => f.write_str("remote"),
            FailureKind::RetriesExhausted => f.write_str("retries_exhausted"),
            FailureKind::Timeout => f.write_str("timeout"),
        }
    }
}

/// Structured error stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Remote,
            message: message.into(),
        }
    }

    pub fn retries_exhausted(attempts: u32, last_error: impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::RetriesExhausted,
            message: format!("Operation failed after {attempts} attempts. Last error: {last_error}"),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("Operation timed out after {:.1} seconds", limit.as_secs_f64()),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Full lifecycle state of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Running,
    Completed { result: RawResult },
    Failed { error: JobFailure },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Running => JobStatus::Running,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Answer to a result query.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    NotReady(JobStatus),
    Completed(RawResult),
    Failed(JobFailure),
}

impl From<&JobState> for JobResult {
    fn from(state: &JobState) -> Self {
        match state {
            JobState::Pending => JobResult::NotReady(JobStatus::Pending),
            JobState::Running => JobResult::NotReady(JobStatus::Running),
            JobState::Completed { result } => JobResult::Completed(Arc::clone(result)),
            JobState::Failed { error } => JobResult::Failed(error.clone()),
        }
    }
}
