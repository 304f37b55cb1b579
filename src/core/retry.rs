//! Retry policy for failed task attempts.
//!
//! `RetryPolicy::decide` is a pure function of the number of failed attempts
//! and the kind of the latest error, so every decision is reproducible.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::handler::ErrorKind;

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// No further attempt; the task ends in `FAILED`.
    Terminal,
    /// Try again once the delay has elapsed.
    RetryAfter(Duration),
}

/// Which error kinds are worth another attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCondition {
    /// Retry transient errors and timeouts only.
    #[default]
    TransientOnly,

    /// Also retry unclassified errors.
    AnyRecoverable,

    /// Never retry.
    Never,
}

impl RetryCondition {
    /// Classification table: whether an error of `kind` may be retried.
    ///
    /// Resolution, validation and fatal errors are terminal under every
    /// condition.
    pub fn allows(self, kind: ErrorKind) -> bool {
        match (self, kind) {
            (RetryCondition::Never, _) => false,
            (_, ErrorKind::Transient | ErrorKind::Timeout) => true,
            (RetryCondition::AnyRecoverable, ErrorKind::Unknown) => true,
            _ => false,
        }
    }
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time.
    Fixed {
        #[serde(with = "serde_millis")]
        delay: Duration,
    },
    /// `base * failed_attempts`, capped at `max`.
    Linear {
        #[serde(with = "serde_millis")]
        base: Duration,
        #[serde(with = "serde_millis")]
        max: Duration,
    },
    /// `base * 2^(failed_attempts - 1)`, capped at `max`.
    Exponential {
        #[serde(with = "serde_millis")]
        base: Duration,
        #[serde(with = "serde_millis")]
        max: Duration,
    },
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts already failed.
    ///
    /// Non-decreasing in `failed_attempts`.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let n = failed_attempts.max(1);
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Linear { base, max } => base.saturating_mul(n).min(max),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_secs(60),
            max: Duration::from_secs(15 * 60),
        }
    }
}

/// Retry policy applied to every failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of failed attempts before the task is given up.
    pub max_attempts: u32,

    /// Delay growth between attempts.
    pub backoff: Backoff,

    /// Which error kinds may be retried.
    pub retry_on: RetryCondition,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
            retry_on: RetryCondition::Never,
        }
    }

    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
            retry_on: RetryCondition::TransientOnly,
        }
    }

    /// Exponential backoff starting at `base`, capped at `max`.
    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, max },
            retry_on: RetryCondition::TransientOnly,
        }
    }

    /// Builder: set the retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Decide what happens after a failed attempt.
    ///
    /// `failed_attempts` counts the attempt that just failed.
    pub fn decide(&self, failed_attempts: u32, kind: ErrorKind) -> RetryDecision {
        if failed_attempts >= self.max_attempts {
            return RetryDecision::Terminal;
        }
        if !self.retry_on.allows(kind) {
            return RetryDecision::Terminal;
        }
        RetryDecision::RetryAfter(self.backoff.delay(failed_attempts))
    }
}

impl Default for RetryPolicy {
    /// Three attempts, exponential backoff from one minute, transient errors only.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            retry_on: RetryCondition::TransientOnly,
        }
    }
}

/// Serde helper: durations as whole milliseconds.
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
