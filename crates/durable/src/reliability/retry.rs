//! Step retry schedule

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often a failing step is retried and how long the engine waits in between
///
/// The schedule is deterministic (no jitter): the wait after failed attempt
/// `n` is `base_delay * multiplier^(n-1)`, capped at `max_delay`.
///
/// ```
/// use flowrun_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential();
/// assert_eq!(policy.delay_after_failure(1), Duration::from_secs(60));
/// assert_eq!(policy.delay_after_failure(3), Duration::from_secs(240));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per step, the first one included
    pub max_attempts: u32,

    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// 4 attempts, waiting 60s, 120s, 240s (capped at one hour)
    pub fn exponential() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }

    /// Same wait after every failure
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait between failed attempt `failed_attempt` (1-based) and the next one
    pub fn delay_after_failure(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = (self.base_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        if secs.is_finite() && secs > 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
        } else {
            Duration::ZERO
        }
    }
}

/// `Duration` as integer milliseconds on the wire
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
