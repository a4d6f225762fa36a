//! Remote job API seam.
//!
//! [`RemoteJobApi`] is the only way the requester talks to the outside
//! world: submit a job, poll its status, then discard it. Implementations classify
//! every failure as [`RemoteError::Transient`] (worth retrying) or
//! [`RemoteError::Fatal`] (decisive).

use std::fmt;

use async_trait::async_trait;
use jobrelay_core::JobKind;
use serde_json::{Map, Value};

/// Identifier the remote side assigned to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteJobId(String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the remote side for a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Pending,
    Running,
    Completed(Value),
    Failed(String),
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Completed(_) | RemoteStatus::Failed(_))
    }
}

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network trouble or a retriable status; the call may be repeated.
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// The remote side rejected the call; repeating it will not help.
    #[error("Fatal remote error: {0}")]
    Fatal(String),
}

/// Binary input uploaded alongside the request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Form field name, e.g. `image` or `audio`.
    pub field: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub mime: String,
}

/// Request body for one remote operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPayload {
    pub params: Map<String, Value>,
    pub files: Vec<Attachment>,
}

impl JobPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a payload from a JSON object. Non-object values yield an
    /// empty parameter map.
    pub fn from_params(params: Value) -> Self {
        match params {
            Value::Object(params) => Self {
                params,
                files: Vec::new(),
            },
            _ => Self::default(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, attachment: Attachment) -> Self {
        self.files.push(attachment);
        self
    }
}

/// Collaborator that submits jobs to a remote service and reports their
/// status.
#[async_trait]
pub trait RemoteJobApi: Send + Sync {
    async fn submit(&self, kind: JobKind, payload: &JobPayload) -> Result<RemoteJobId, RemoteError>;

    async fn poll_status(&self, remote_id: &RemoteJobId) -> Result<RemoteStatus, RemoteError>;

    /// Forget a submitted job. Called once the poll task is done with
    /// `remote_id`, whether or not it polled to a terminal status.
    async fn discard(&self, _remote_id: &RemoteJobId) {}
}
