//! Exponential backoff for the retryable provider failure class.

use std::time::Duration;

use rand::Rng;
use warpline_core::WarplineError;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-based): base * 2^(attempt-1), capped,
    /// with up to 25% jitter so herds of retries spread out.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let raw = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        let capped = raw.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        capped.mul_f64(1.0 + jitter)
    }

    pub fn should_retry(&self, error: &WarplineError, attempt: usize) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}

/// Classify an HTTP status into the retryable subset: 408, 429 and 5xx are
/// transient; everything else surfaces immediately.
pub fn error_for_status(status: u16, body: &str) -> WarplineError {
    let message = format!("HTTP {status}: {body}");
    if status == 408 || status == 429 || status >= 500 {
        WarplineError::provider_retryable(message)
    } else {
        WarplineError::provider(message)
    }
}
