//! REST client for the Livepeer AI gateway.
//!
//! The gateway answers every generation request synchronously, so
//! [`LivepeerClient::submit`](RemoteJobApi::submit) performs the whole
//! generation call and parks the response under a fresh remote id. The
//! first status poll for that id hands the parked response back as
//! [`RemoteStatus::Completed`]. A parked response that is never polled
//! is dropped when the poll task discards its remote id.
//!
//! Every HTTP request is bounded by a per-request timeout; a request that
//! runs out of time is reported as a transient error.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jobrelay_core::{JobKind, RelayConfig};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

use crate::api::{JobPayload, RemoteError, RemoteJobApi, RemoteJobId, RemoteStatus};

/// Per-request HTTP timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for one Livepeer AI gateway.
pub struct LivepeerClient {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    /// Responses waiting for their first status poll.
    parked: Mutex<HashMap<RemoteJobId, Value>>,
}

/// Errors from the gateway REST layer.
#[derive(Debug, thiserror::Error)]
pub enum LivepeerApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decode, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Livepeer API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl LivepeerApiError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LivepeerApiError::Request(e) => {
                !e.is_decode() && (e.is_timeout() || e.is_connect() || e.is_request())
            }
            LivepeerApiError::ApiError { status, .. } => is_retriable_status(*status),
        }
    }
}

impl From<LivepeerApiError> for RemoteError {
    fn from(err: LivepeerApiError) -> Self {
        if err.is_transient() {
            RemoteError::Transient(err.to_string())
        } else {
            RemoteError::Fatal(err.to_string())
        }
    }
}

/// Request timeout, server overload and server-side failures.
fn is_retriable_status(status: u16) -> bool {
    status == StatusCode::REQUEST_TIMEOUT.as_u16()
        || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
        || status >= 500
}

impl LivepeerClient {
    /// Create a new client for a gateway.
    ///
    /// * `gateway_url` - Base URL, e.g. `https://dream-gateway.livepeer.cloud`.
    /// * `api_key`     - Bearer token; may be empty for open gateways.
    pub fn new(
        gateway_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, LivepeerApiError> {
        Self::with_timeout(gateway_url, api_key, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose HTTP requests give up after `timeout`.
    pub fn with_timeout(
        gateway_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LivepeerApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, gateway_url, api_key))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        gateway_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            parked: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, LivepeerApiError> {
        Self::with_timeout(
            config.gateway_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )
    }

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    /// Run one generation request and return the decoded response body.
    ///
    /// Parameters are posted as JSON unless the payload carries files, in
    /// which case a multipart form is sent instead.
    pub async fn generate(
        &self,
        kind: JobKind,
        payload: &JobPayload,
    ) -> Result<Value, LivepeerApiError> {
        let params = with_default_model(kind, payload);
        let mut request = self
            .client
            .post(format!("{}{}", self.gateway_url, kind.endpoint()));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = if payload.files.is_empty() {
            request.json(&params).send().await?
        } else {
            request.multipart(build_form(&params, payload)?).send().await?
        };

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn parked(&self) -> MutexGuard<'_, HashMap<RemoteJobId, Value>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold `response` until it is polled or discarded.
    fn park(&self, response: Value) -> RemoteJobId {
        let remote_id = RemoteJobId::new(uuid::Uuid::new_v4().to_string());
        self.parked().insert(remote_id.clone(), response);
        remote_id
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`LivepeerApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, LivepeerApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(LivepeerApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LivepeerApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteJobApi for LivepeerClient {
    async fn submit(&self, kind: JobKind, payload: &JobPayload) -> Result<RemoteJobId, RemoteError> {
        let response = self.generate(kind, payload).await.map_err(|e| {
            tracing::warn!(kind = %kind, error = %e, "Livepeer request failed");
            RemoteError::from(e)
        })?;

        let remote_id = self.park(response);
        tracing::debug!(kind = %kind, remote_id = %remote_id, "Livepeer response parked");
        Ok(remote_id)
    }

    async fn poll_status(&self, remote_id: &RemoteJobId) -> Result<RemoteStatus, RemoteError> {
        self.parked()
            .remove(remote_id)
            .map(RemoteStatus::Completed)
            .ok_or_else(|| RemoteError::Fatal(format!("Unknown remote job {remote_id}")))
    }

    async fn discard(&self, remote_id: &RemoteJobId) {
        if self.parked().remove(remote_id).is_some() {
            tracing::debug!(remote_id = %remote_id, "Unpolled Livepeer response dropped");
        }
    }
}

/// Request parameters with the kind's default model filled in when the
/// caller did not choose one.
fn with_default_model(kind: JobKind, payload: &JobPayload) -> serde_json::Map<String, Value> {
    let mut params = payload.params.clone();
    let missing = params
        .get("model_id")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty);
    if missing {
        match kind.default_model() {
            Some(model) => {
                params.insert("model_id".to_string(), Value::from(model));
            }
            None => {
                params.remove("model_id");
            }
        }
    }
    params
}

/// Text value of a form field: strings verbatim, everything else as JSON.
fn form_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_form(
    params: &serde_json::Map<String, Value>,
    payload: &JobPayload,
) -> Result<Form, LivepeerApiError> {
    let mut form = Form::new();
    for (key, value) in params {
        if value.is_null() {
            continue;
        }
        form = form.text(key.clone(), form_text(value));
    }
    for file in &payload.files {
        let part = Part::bytes(file.content.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime)?;
        form = form.part(file.field.clone(), part);
    }
    Ok(form)
}
