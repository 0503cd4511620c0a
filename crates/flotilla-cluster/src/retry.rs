//! Bounded retry with exponential backoff for control-plane calls.
//!
//! Only `ControlError::Unreachable` is retried: a rejection is a verdict,
//! not a transient fault. The attempt budget caps every caller — nothing in
//! the orchestrator retries indefinitely.

use std::time::Duration;

use tracing::debug;

use crate::api::ControlError;

/// Retry budget for one logical control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt).
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `op`, retrying transient unreachability within the policy's budget.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ControlError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlError>>,
{
    let budget = policy.attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(ControlError::Unreachable(reason)) if attempt < budget => {
                debug!(
                    attempt,
                    budget,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "control plane unreachable, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}
