use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::CoreError;

/// Default Livepeer AI gateway.
pub const DEFAULT_GATEWAY_URL: &str = "https://dream-gateway.livepeer.cloud";

/// Whether `submit` waits for the terminal state or hands polling to a
/// background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sync => f.write_str("sync"),
            ExecutionMode::Async => f.write_str("async"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(ExecutionMode::Sync),
            "async" => Ok(ExecutionMode::Async),
            other => Err(CoreError::Validation(format!(
                "mode must be `sync` or `async`, got `{other}`"
            ))),
        }
    }
}

/// Per-request options consumed by the requester.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub mode: ExecutionMode,
    /// Retries after the first attempt of each remote call.
    pub max_retries: u32,
    /// Base of the exponential backoff.
    pub retry_delay: Duration,
    /// Overall deadline, measured from the start of the request.
    pub timeout: Duration,
    /// Pause between status polls while the remote job is not terminal.
    pub poll_interval: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sync,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RequestOptions {
    pub fn sync() -> Self {
        Self::default()
    }

    pub fn asynchronous() -> Self {
        Self {
            mode: ExecutionMode::Async,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Check that the durations are usable.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.retry_delay.is_zero() {
            return Err(CoreError::Validation(
                "retry_delay must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CoreError::Validation("timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Fresh retry budget for one remote call.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.max_retries,
            BackoffConfig::with_initial_delay(self.retry_delay),
        )
    }
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub gateway_url: String,
    /// Defaults applied to requests that do not override them.
    pub request: RequestOptions,
    /// Upper bound on a single HTTP request to the gateway.
    pub request_timeout: Duration,
    pub max_concurrent_polls: usize,
    pub sweep_interval: Duration,
    pub unclaimed_ttl: Duration,
    pub stale_pending_after: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            request: RequestOptions::default(),
            request_timeout: Duration::from_secs(120),
            max_concurrent_polls: 8,
            sweep_interval: Duration::from_secs(300),
            unclaimed_ttl: Duration::from_secs(3600),
            stale_pending_after: Duration::from_secs(3600),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                                |
    /// |---------------------------------|----------------------------------------|
    /// | `LIVEPEER_API_KEY`              | empty                                  |
    /// | `LIVEPEER_GATEWAY_URL`          | `https://dream-gateway.livepeer.cloud` |
    /// | `JOBRELAY_MAX_RETRIES`          | `3`                                    |
    /// | `JOBRELAY_RETRY_DELAY_SECS`     | `2.0`                                  |
    /// | `JOBRELAY_TIMEOUT_SECS`         | `120`                                  |
    /// | `JOBRELAY_POLL_INTERVAL_SECS`   | `1.0`                                  |
    /// | `JOBRELAY_MODE`                 | `sync`                                 |
    /// | `JOBRELAY_HTTP_TIMEOUT_SECS`    | `120`                                  |
    /// | `JOBRELAY_MAX_CONCURRENT_POLLS` | `8`                                    |
    /// | `JOBRELAY_SWEEP_INTERVAL_SECS`  | `300`                                  |
    /// | `JOBRELAY_UNCLAIMED_TTL_SECS`   | `3600`                                 |
    /// | `JOBRELAY_STALE_PENDING_SECS`   | `3600`                                 |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_key = lookup("LIVEPEER_API_KEY").unwrap_or_default();
        let gateway_url = lookup("LIVEPEER_GATEWAY_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.gateway_url);

        let mode = match lookup("JOBRELAY_MODE") {
            Some(raw) => raw.parse::<ExecutionMode>().map_err(|e| CoreError::Config {
                var: "JOBRELAY_MODE",
                reason: e.to_string(),
            })?,
            None => defaults.request.mode,
        };

        let request = RequestOptions {
            mode,
            max_retries: parse_number(&lookup, "JOBRELAY_MAX_RETRIES", defaults.request.max_retries)?,
            retry_delay: parse_secs(&lookup, "JOBRELAY_RETRY_DELAY_SECS", defaults.request.retry_delay)?,
            timeout: parse_secs(&lookup, "JOBRELAY_TIMEOUT_SECS", defaults.request.timeout)?,
            poll_interval: parse_secs(
                &lookup,
                "JOBRELAY_POLL_INTERVAL_SECS",
                defaults.request.poll_interval,
            )?,
        };

        let max_concurrent_polls = parse_number(
            &lookup,
            "JOBRELAY_MAX_CONCURRENT_POLLS",
            defaults.max_concurrent_polls,
        )?;
        if max_concurrent_polls == 0 {
            return Err(CoreError::Config {
                var: "JOBRELAY_MAX_CONCURRENT_POLLS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            api_key,
            gateway_url,
            request,
            request_timeout: parse_secs(&lookup, "JOBRELAY_HTTP_TIMEOUT_SECS", defaults.request_timeout)?,
            max_concurrent_polls,
            sweep_interval: parse_secs(&lookup, "JOBRELAY_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            unclaimed_ttl: parse_secs(&lookup, "JOBRELAY_UNCLAIMED_TTL_SECS", defaults.unclaimed_ttl)?,
            stale_pending_after: parse_secs(
                &lookup,
                "JOBRELAY_STALE_PENDING_SECS",
                defaults.stale_pending_after,
            )?,
        })
    }
}

fn parse_number<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| CoreError::Config {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse a positive, finite number of seconds.
fn parse_secs<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    let secs: f64 = raw.trim().parse().map_err(|e: std::num::ParseFloatError| CoreError::Config {
        var,
        reason: e.to_string(),
    })?;
    if !(secs > 0.0) {
        return Err(CoreError::Config {
            var,
            reason: format!("must be a positive number of seconds, got {secs}"),
        });
    }
    let duration = Duration::try_from_secs_f64(secs).map_err(|e| CoreError::Config {
        var,
        reason: e.to_string(),
    })?;
    if duration.is_zero() {
        return Err(CoreError::Config {
            var,
            reason: format!("{secs} seconds rounds down to zero"),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.request, RequestOptions::default());
        assert_eq!(config.max_concurrent_polls, 8);
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("LIVEPEER_API_KEY", "secret"),
            ("LIVEPEER_GATEWAY_URL", "http://localhost:8935/"),
            ("JOBRELAY_MAX_RETRIES", "5"),
            ("JOBRELAY_RETRY_DELAY_SECS", "0.5"),
            ("JOBRELAY_MODE", "ASYNC"),
        ]))
        .unwrap();

        assert_eq!(config.api_key, "secret");
        assert_eq!(config.gateway_url, "http://localhost:8935");
        assert_eq!(config.request.max_retries, 5);
        assert_eq!(config.request.retry_delay, Duration::from_millis(500));
        assert_eq!(config.request.mode, ExecutionMode::Async);
    }

    #[test]
    fn non_positive_delay_rejected() {
        let result = RelayConfig::from_lookup(lookup_from(&[("JOBRELAY_RETRY_DELAY_SECS", "0")]));
        assert_matches!(
            result,
            Err(CoreError::Config { var: "JOBRELAY_RETRY_DELAY_SECS", .. })
        );
    }

    #[test]
    fn sub_nanosecond_interval_rejected() {
        let result =
            RelayConfig::from_lookup(lookup_from(&[("JOBRELAY_SWEEP_INTERVAL_SECS", "1e-10")]));
        assert_matches!(
            result,
            Err(CoreError::Config { var: "JOBRELAY_SWEEP_INTERVAL_SECS", .. })
        );
    }

    #[test]
    fn http_timeout_override() {
        let config =
            RelayConfig::from_lookup(lookup_from(&[("JOBRELAY_HTTP_TIMEOUT_SECS", "15")])).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(
            RelayConfig::default().request_timeout,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn garbage_number_rejected() {
        let result = RelayConfig::from_lookup(lookup_from(&[("JOBRELAY_MAX_RETRIES", "-1")]));
        assert_matches!(result, Err(CoreError::Config { var: "JOBRELAY_MAX_RETRIES", .. }));
    }

    #[test]
    fn unknown_mode_rejected() {
        let result = RelayConfig::from_lookup(lookup_from(&[("JOBRELAY_MODE", "later")]));
        assert_matches!(result, Err(CoreError::Config { var: "JOBRELAY_MODE", .. }));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let result =
            RelayConfig::from_lookup(lookup_from(&[("JOBRELAY_MAX_CONCURRENT_POLLS", "0")]));
        assert_matches!(result, Err(CoreError::Config { .. }));
    }

    #[test]
    fn request_options_validation() {
        assert!(RequestOptions::default().validate().is_ok());
        let zero_timeout = RequestOptions::default().with_timeout(Duration::ZERO);
        assert_matches!(zero_timeout.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn request_backoff_uses_retry_delay() {
        let options = RequestOptions::default()
            .with_max_retries(2)
            .with_retry_delay(Duration::from_secs(3));
        let mut backoff = options.backoff();
        assert_eq!(backoff.next_retry(), Some(Duration::from_secs(3)));
        assert_eq!(backoff.next_retry(), Some(Duration::from_secs(6)));
        assert_eq!(backoff.next_retry(), None);
    }
}
