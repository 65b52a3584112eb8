//! Bounded retry with timeout and exponential backoff for text-service calls.
//!
//! A reply that cannot be parsed into the expected shape counts as a
//! retryable fault, same as a transport error. After the last attempt the
//! final typed error is returned; callers never see "no data" in its place.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, LlmProvider};

/// Retry policy for text-service calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_factor: f64,
    /// Upper bound on a single delay.
    pub max_backoff: Duration,
    /// Random jitter added to each delay, as a fraction of it (0.0 – 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts (tests, local tools).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            timeout: Duration::from_secs(5),
            initial_backoff: Duration::ZERO,
            backoff_factor: 1.0,
            max_backoff: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before `attempt` (1-based; attempt 1 has no delay).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(attempt as i32 - 2);
        let base_ms = self.initial_backoff.as_millis() as f64 * exp;
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);
        let jitter_ms = if self.jitter > 0.0 && capped_ms > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped_ms * self.jitter)
        } else {
            0.0
        };
        Duration::from_millis((capped_ms + jitter_ms).round() as u64)
    }
}

/// Run `request` against `llm`, parsing each reply with `parse`.
///
/// Transport faults, timeouts and parse failures are retried up to
/// `policy.max_attempts`; permanent errors return immediately.
pub async fn complete_with_retry<T, F>(
    llm: &dyn LlmProvider,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    parse: F,
) -> Result<T, LlmError>
where
    F: Fn(&str) -> Result<T, String>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error: Option<LlmError> = None;

    for attempt in 1..=attempts {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
        }

        let outcome = tokio::time::timeout(policy.timeout, llm.complete(request.clone())).await;
        let error = match outcome {
            Err(_) => LlmError::Timeout {
                provider: llm.model_name().to_string(),
                timeout: policy.timeout,
            },
            Ok(Err(e)) => e,
            Ok(Ok(response)) => match parse(&response.content) {
                Ok(value) => return Ok(value),
                Err(reason) => LlmError::InvalidResponse {
                    provider: llm.model_name().to_string(),
                    reason,
                },
            },
        };

        if !error.is_retryable() {
            warn!(attempt, error = %error, "Text service call failed permanently");
            return Err(error);
        }
        warn!(attempt, max_attempts = attempts, error = %error, "Text service call failed");
        last_error = Some(error);
    }

    Err(last_error.unwrap_or_else(|| LlmError::RequestFailed {
        provider: llm.model_name().to_string(),
        reason: "no attempts made".into(),
    }))
}
