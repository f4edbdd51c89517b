use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use backon::ExponentialBuilder;

/// What `search` does when the service answers 429.
///
/// Publishing always surfaces rate limits: a retried publish could create a
/// duplicate post if the first attempt partially succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Return [`crate::XApiError::RateLimited`] and let the caller schedule
    /// the next attempt.
    #[default]
    Surface,
    /// Wait and retry within the retry budget.
    Retry,
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Surface => "surface",
            Self::Retry => "retry",
        })
    }
}

impl FromStr for RateLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "surface" => Ok(Self::Surface),
            "retry" => Ok(Self::Retry),
            other => Err(format!(
                "unknown rate limit policy `{other}` (expected `surface` or `retry`)"
            )),
        }
    }
}

/// Exponential backoff: `min_delay`, doubling up to `max_delay`, at most
/// `max_times` retries after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_times: usize,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_times: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_times: 0,
            ..Self::default()
        }
    }

    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_times);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}
