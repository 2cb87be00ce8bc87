//! Delays between query attempts.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

/// Decides how long to wait before the next attempt.
///
/// `attempt` is the number of attempts made so far, starting at 1. The attempt budget is owned
/// by the caller; a backoff only spaces attempts out.
pub trait Backoff: fmt::Debug + Send + Sync {
    fn delay(&self, attempt: usize) -> Duration;
}

/// Retries immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        Duration::ZERO
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        self.0
    }
}

/// `initial * factor^(attempt - 1)`, capped at `max`.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    factor: u32,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self {
        Self {
            initial,
            factor: factor.max(1),
            max,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.factor
            .checked_pow(exponent)
            .and_then(|multiplier| self.initial.checked_mul(multiplier))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

const fn default_initial_backoff_secs() -> u64 {
    1
}

const fn default_factor() -> u32 {
    2
}

const fn default_max_backoff_secs() -> u64 {
    30
}

/// Serializable choice of [`Backoff`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "snake_case", tag = "strategy")]
pub enum BackoffConfig {
    #[default]
    None,
    Fixed {
        delay_secs: u64,
    },
    Exponential {
        #[serde(default = "default_initial_backoff_secs")]
        initial_backoff_secs: u64,
        #[serde(default = "default_factor")]
        factor: u32,
        #[serde(default = "default_max_backoff_secs")]
        max_backoff_secs: u64,
    },
}

impl BackoffConfig {
    pub fn build(&self) -> Arc<dyn Backoff> {
        match self {
            Self::None => Arc::new(NoBackoff),
            Self::Fixed { delay_secs } => Arc::new(FixedBackoff(Duration::from_secs(*delay_secs))),
            Self::Exponential {
                initial_backoff_secs,
                factor,
                max_backoff_secs,
            } => Arc::new(ExponentialBackoff::new(
                Duration::from_secs(*initial_backoff_secs),
                *factor,
                Duration::from_secs(*max_backoff_secs),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_grows_until_capped() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(250), 2, Duration::from_secs(1));
        let delays = (1..=5).map(|attempt| backoff.delay(attempt)).collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), 10, Duration::from_secs(60));
        assert_eq!(backoff.delay(usize::MAX), Duration::from_secs(60));
    }

    #[test]
    fn config_defaults_to_immediate_retries() {
        let config: BackoffConfig = toml::from_str(r#"strategy = "none""#).unwrap();
        assert_eq!(config, BackoffConfig::default());
        assert_eq!(config.build().delay(3), Duration::ZERO);

        let config: BackoffConfig =
            serde_json::from_str(r#"{"strategy": "exponential", "max_backoff_secs": 4}"#).unwrap();
        assert_eq!(config.build().delay(4), Duration::from_secs(4));
    }
}
