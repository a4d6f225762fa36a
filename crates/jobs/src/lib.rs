//! Job lifecycle registry.
//!
//! Provides the shared [`JobService`] that tracks every remote job from
//! registration to reclamation:
//!
//! - [`state`] -- lifecycle states and the structured failure type.
//! - [`service`] -- the synchronized job table and consumer associations.
//! - [`sweeper`] -- timer-driven reclamation task.
//! - [`events`] -- lifecycle events broadcast to subscribers.

pub mod events;
pub mod service;
pub mod state;
pub mod sweeper;

pub use events::JobEvent;
pub use service::{JobService, JobServiceError, JobSnapshot, ServiceConfig};
pub use state::{FailureKind, JobFailure, JobResult, JobState, JobStatus, RawResult};
