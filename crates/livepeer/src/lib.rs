//! Remote job submission for the Livepeer AI gateway.
//!
//! - [`api`] -- the [`RemoteJobApi`] seam and its request/status types.
//! - [`client`] -- reqwest-backed [`LivepeerClient`].
//! - [`poll`] -- retry, backoff and deadline handling for one job.
//! - [`requester`] -- [`Requester`], the sync/async submission front door.

pub mod api;
pub mod client;
pub mod poll;
pub mod requester;

pub use api::{Attachment, JobPayload, RemoteError, RemoteJobApi, RemoteJobId, RemoteStatus};
pub use client::{LivepeerApiError, LivepeerClient};
pub use poll::PollTask;
pub use requester::{Requester, RequesterConfig};
