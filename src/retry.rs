use crate::delivery::AttemptOutcome;
use crate::error::{WebhookError, WebhookResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Status code recorded for attempts that never received an HTTP response
pub const NETWORK_ERROR_STATUS: u16 = 0;

/// Retry parameters resolved for a single job.
///
/// A copy is stored on every job at creation time, so changing a provider
/// override later does not affect jobs already in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction in [0, 1] of the exponential term used as symmetric jitter
    pub jitter: f64,
    pub retryable_status_codes: BTreeSet<u16>,
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
            retryable_status_codes: [429, 500, 502, 503, 504, 408, NETWORK_ERROR_STATUS]
                .into_iter()
                .collect(),
            timeout_ms: 15000,
        }
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Whether another attempt may follow the given (1-indexed) attempt
    pub fn has_attempts_left(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }

    /// Reject configurations that would make the retry loop misbehave.
    pub fn validate(&self) -> WebhookResult<()> {
        if self.max_attempts == 0 {
            return Err(WebhookError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(WebhookError::InvalidConfig(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(WebhookError::InvalidConfig(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(WebhookError::InvalidConfig(format!(
                "backoff_multiplier must be a finite value >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(WebhookError::InvalidConfig(format!(
                "jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// How HTTP statuses outside the success range are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMode {
    /// Only statuses in `retryable_status_codes` are retried
    #[default]
    Strict,
    /// Every non-2xx/3xx status is retried until attempts run out
    Lenient,
}

/// Backoff delay preceding the retry that follows `attempt_number`.
pub fn calculate_retry_delay(attempt_number: u32, config: &RetryConfig) -> Duration {
    calculate_retry_delay_with(attempt_number, config, rand::random::<f64>())
}

/// Same as [`calculate_retry_delay`] with the random sample supplied by the caller.
///
/// `sample` is expected in [0, 1); 0.5 yields the un-jittered exponential term.
pub fn calculate_retry_delay_with(attempt_number: u32, config: &RetryConfig, sample: f64) -> Duration {
    let max_delay = config.max_delay_ms as f64;
    let exponent = attempt_number.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    if !base.is_finite() {
        return Duration::from_millis(config.max_delay_ms);
    }

    let jitter = base * config.jitter * (sample - 0.5);
    let delay_ms = (base + jitter).min(max_delay).max(0.0);
    Duration::from_nanos((delay_ms * 1_000_000.0).round() as u64)
}

/// Whether the outcome is eligible for another attempt, ignoring the attempt budget
pub fn should_retry(outcome: &AttemptOutcome) -> bool {
    outcome.is_retryable()
}

/// Whether a retry is actually scheduled after `attempt_number` produced `outcome`
pub fn should_schedule_retry(outcome: &AttemptOutcome, attempt_number: u32, config: &RetryConfig) -> bool {
    should_retry(outcome) && config.has_attempts_left(attempt_number)
}
