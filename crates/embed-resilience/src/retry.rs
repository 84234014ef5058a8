//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, error, warn};

use embed_types::RetrySettings;

/// Retry policy: bounded attempts with exponential backoff.
///
/// Jitter comes from the backoff crate's randomization factor, so repeated
/// failures across callers do not synchronize into retry storms.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// First backoff interval
    pub initial_interval: Duration,
    /// Interval ceiling
    pub max_interval: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Build from settings.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            multiplier: 2.0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Run `op` under the policy.
///
/// Only errors where `is_retryable` returns true are retried; others fail
/// immediately. `delay_hint` lets an error carry its own delay (e.g. a
/// provider Retry-After), which then overrides the computed backoff for
/// that attempt.
pub async fn retry<T, E, Op, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: Op,
    is_retryable: impl Fn(&E) -> bool,
    delay_hint: impl Fn(&E) -> Option<Duration>,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = policy.backoff();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        debug!(operation = operation, attempt = attempts, "Attempting call");

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(operation = operation, error = %e, "Not retryable, failing");
                    return Err(e);
                }
                if attempts > policy.max_retries {
                    error!(operation = operation, error = %e, "Max retries exceeded");
                    return Err(e);
                }

                let delay = delay_hint(&e)
                    .or_else(|| backoff.next_backoff())
                    .unwrap_or(policy.max_interval);

                warn!(
                    operation = operation,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, String> = retry(
            &fast_policy(3),
            "test",
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(99)
                }
            },
            |_| true,
            |_| None,
        )
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), String> = retry(
            &fast_policy(3),
            "test",
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("transient".to_string())
                }
            },
            |_| true,
            |_| None,
        )
        .await;

        assert!(result.is_err());
        // max_retries + 1 attempts, never more
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), String> = retry(
            &fast_policy(5),
            "test",
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("bad config".to_string())
                }
            },
            |e| !e.contains("config"),
            |_| None,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventually_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, String> = retry(
            &fast_policy(3),
            "test",
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            |_| true,
            |_| None,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_delay_hint_is_honored() {
        let start = std::time::Instant::now();

        let _: Result<(), String> = retry(
            &fast_policy(1),
            "test",
            || async { Err("rate limited".to_string()) },
            |_| true,
            |_| Some(Duration::from_millis(30)),
        )
        .await;

        // One retry with a 30ms hinted delay
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
