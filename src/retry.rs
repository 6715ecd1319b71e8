//! Bounded retries with exponential backoff around a [`ModelClient`].

use crate::client::{ModelClient, ModelReply, ModelRequest};
use std::time::Duration;

/// Attempt budget and backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff before retry number `retry` (1-based): `base * 2^(retry - 1)`
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Definitive result of a retried invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Reply from the successful attempt, `None` once the budget is spent
    pub reply: Option<ModelReply>,
    /// Attempts actually made
    pub attempts: u32,
    /// Message of the last failure, if any
    pub last_error: Option<String>,
}

impl RetryOutcome {
    /// True when every attempt failed
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.reply.is_none()
    }
}

/// Invoke `client`, retrying failures with exponential backoff.
///
/// Never fails: exhausting the budget yields `reply: None` with
/// `attempts == policy.max_attempts`.
pub fn invoke_with_retry<C: ModelClient + ?Sized>(
    client: &C,
    request: &ModelRequest,
    policy: RetryPolicy,
) -> RetryOutcome {
    invoke_with_retry_using(client, request, policy, std::thread::sleep)
}

/// [`invoke_with_retry`] with an injectable sleep function
pub fn invoke_with_retry_using<C, S>(
    client: &C,
    request: &ModelRequest,
    policy: RetryPolicy,
    mut sleep: S,
) -> RetryOutcome
where
    C: ModelClient + ?Sized,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match client.complete(request) {
            Ok(reply) => {
                return RetryOutcome {
                    reply: Some(reply),
                    attempts: attempt,
                    last_error,
                };
            }
            Err(e) => {
                tracing::warn!(
                    model = %request.model,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Model invocation failed"
                );
                last_error = Some(e.to_string());
                if attempt < max_attempts {
                    let delay = policy.delay_for(attempt);
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                    sleep(delay);
                }
            }
        }
    }

    tracing::error!(
        model = %request.model,
        attempts = max_attempts,
        "Giving up after exhausting retries"
    );
    RetryOutcome {
        reply: None,
        attempts: max_attempts,
        last_error,
    }
}
