//! Exponential-backoff retry budget.
//!
//! A [`Backoff`] hands out the delay before each retry until the retry
//! budget is spent. Delays start at [`BackoffConfig::initial_delay`],
//! grow by [`BackoffConfig::multiplier`] and are clamped to
//! [`BackoffConfig::max_delay`].

use std::time::Duration;

/// Default factor by which the delay grows after each failure.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl BackoffConfig {
    pub fn with_initial_delay(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..Default::default()
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Remaining retry budget plus the delay to wait before the next retry.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    remaining: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32, config: BackoffConfig) -> Self {
        Self {
            config,
            remaining: max_retries,
            delay: config.initial_delay.min(config.max_delay),
        }
    }

    /// Consume one retry and return how long to wait before it, or `None`
    /// once the budget is exhausted.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.delay;
        self.delay = next_delay(delay, &self.config);
        Some(delay)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = BackoffConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn custom_multiplier() {
        let config = BackoffConfig {
            multiplier: 1.5,
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(2), &config);
        assert_eq!(d, Duration::from_secs(3));
    }

    #[test]
    fn budget_of_three_yields_two_four_eight() {
        let mut backoff = Backoff::new(3, BackoffConfig::with_initial_delay(Duration::from_secs(2)));
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_retry())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8]);
        assert_eq!(backoff.remaining(), 0);
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut backoff = Backoff::new(0, BackoffConfig::default());
        assert!(backoff.next_retry().is_none());
    }

    #[test]
    fn long_sequence_saturates_at_max() {
        let mut backoff = Backoff::new(
            10,
            BackoffConfig {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        );
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_retry())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
    }
}
