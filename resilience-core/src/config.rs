//! Pipeline configuration.
//!
//! All durations are (de)serialized as integer milliseconds under `*_ms` keys.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on retries a single call may make.
pub const MAX_RETRY_ATTEMPTS: u32 = 100;

/// How the delay grows between successive retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffType {
    /// Same delay before every retry
    Constant,
    /// `base_delay * k` before the k-th retry
    Linear,
    /// `base_delay * 2^k` before the k-th retry
    #[default]
    Exponential,
}

/// Configuration for the retry strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries beyond the first attempt
    pub max_attempts: u32,
    /// Base delay the backoff is computed from
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    /// Backoff growth
    pub backoff: BackoffType,
    /// Upper bound on any single delay
    #[serde(rename = "max_delay_ms", with = "option_duration_millis")]
    pub max_delay: Option<Duration>,
    /// Randomize delays within `[delay / 2, delay]`
    pub jitter: bool,
    /// Whether a short-circuited attempt is retried (and consumes an attempt)
    pub retry_on_circuit_open: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: BackoffType::Exponential,
            max_delay: None,
            jitter: false,
            retry_on_circuit_open: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffType) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_on_circuit_open(mut self, retry: bool) -> Self {
        self.retry_on_circuit_open = retry;
        self
    }

    /// Total number of times the operation may run.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(CoreError::Validation(format!(
                "max_attempts must be at most {}, got {}",
                MAX_RETRY_ATTEMPTS, self.max_attempts
            )));
        }
        if let Some(max_delay) = self.max_delay {
            if max_delay < self.base_delay {
                return Err(CoreError::Validation(format!(
                    "max_delay ({:?}) must not be below base_delay ({:?})",
                    max_delay, self.base_delay
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0 - 1.0) at or above which the circuit opens
    pub failure_ratio: f64,
    /// Outcomes needed in the window before the ratio is evaluated
    pub minimum_throughput: u32,
    /// Length of the rolling window
    #[serde(rename = "sampling_duration_ms", with = "duration_millis")]
    pub sampling_duration: Duration,
    /// Time to stay open before allowing a trial call
    #[serde(rename = "break_duration_ms", with = "duration_millis")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            minimum_throughput: 3,
            sampling_duration: Duration::from_secs(10),
            break_duration: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio;
        self
    }

    pub fn with_minimum_throughput(mut self, minimum: u32) -> Self {
        self.minimum_throughput = minimum;
        self
    }

    pub fn with_sampling_duration(mut self, duration: Duration) -> Self {
        self.sampling_duration = duration;
        self
    }

    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_ratio) {
            return Err(CoreError::Validation(format!(
                "failure_ratio must be within 0.0..=1.0, got {}",
                self.failure_ratio
            )));
        }
        if self.minimum_throughput == 0 {
            return Err(CoreError::Validation(
                "minimum_throughput must be at least 1".to_string(),
            ));
        }
        if self.sampling_duration.is_zero() {
            return Err(CoreError::Validation(
                "sampling_duration must be greater than zero".to_string(),
            ));
        }
        if self.break_duration.is_zero() {
            return Err(CoreError::Validation(
                "break_duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration of one named pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Overarching deadline for one `execute` call, retries included
    #[serde(rename = "timeout_ms", with = "option_duration_millis")]
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        if matches!(self.timeout, Some(timeout) if timeout.is_zero()) {
            return Err(CoreError::Validation(
                "timeout must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
