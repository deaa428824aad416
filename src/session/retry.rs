//! Bounded retry with exponential backoff.
//!
//! Backoff is `base_delay * 2^n`, capped at `max_delay`. Only errors the
//! caller marks as transient are retried.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry limits for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    #[serde(with = "duration_str")]
    pub base_delay: Duration,

    #[serde(with = "duration_str")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries: a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Durations as human-readable strings (`"200ms"`, `"30s"`).
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are used up. Returns the last error in the latter cases.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    policy: &RetryPolicy,
    is_retryable: fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;
                if !is_retryable(&err) || attempt >= policy.max_attempts.max(1) {
                    return Err(err);
                }

                let backoff = policy.backoff(attempt - 1);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                sleep(backoff).await;
            }
        }
    }
}

/// Like [`retry_with_backoff`], but stops as soon as `cancel` resolves.
///
/// `cancel` is checked before every attempt and raced against every backoff
/// sleep. An attempt already in flight runs to completion. Returns `None`
/// when cancelled.
pub async fn retry_until_cancelled<F, Fut, T, E, C>(
    mut operation: F,
    policy: &RetryPolicy,
    is_retryable: fn(&E) -> bool,
    cancel: C,
) -> Option<Result<T, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut attempt = 0;

    loop {
        if cancel.as_mut().now_or_never().is_some() {
            return None;
        }

        match operation().await {
            Ok(result) => return Some(Ok(result)),
            Err(err) => {
                attempt += 1;
                if !is_retryable(&err) || attempt >= policy.max_attempts.max(1) {
                    return Some(Err(err));
                }

                let backoff = policy.backoff(attempt - 1);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = cancel.as_mut() => return None,
                }
            }
        }
    }
}
