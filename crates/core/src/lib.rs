//! Shared building blocks for the jobrelay workspace.
//!
//! Identifiers, job kinds, request options, environment configuration
//! and backoff math used by the job service, the requester and the
//! getters.

pub mod backoff;
pub mod config;
pub mod error;
pub mod kind;
pub mod types;

pub use config::{ExecutionMode, RelayConfig, RequestOptions};
pub use error::CoreError;
pub use kind::{JobKind, OutputFamily};
pub use types::{ConsumerId, JobId, Timestamp};
