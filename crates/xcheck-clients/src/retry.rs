//! Retry policy for provider calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ClientError, Result};

/// How often and how long to wait before re-sending a failed request.
///
/// Authentication failures are returned at once. Rate limits back off
/// exponentially from `base_delay_ms`; every other error waits
/// `base_delay_ms` flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Wait before retry number `attempt` (0-based), or `None` to give up.
    pub fn delay_for(&self, error: &ClientError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries || !error.retryable() {
            return None;
        }
        match error {
            ClientError::RateLimit(_) => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                Some(self.base_delay().saturating_mul(factor))
            }
            _ => Some(self.base_delay()),
        }
    }

    /// Run `op` until it succeeds or the policy gives up. `op` receives the
    /// 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => match self.delay_for(&err, attempt) {
                    Some(delay) => {
                        warn!(
                            event = "provider.retry",
                            agent = label,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        let limited = ClientError::RateLimit("429".into());
        let timeout = ClientError::Timeout("slow".into());

        assert_eq!(policy.delay_for(&limited, 0), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(&limited, 1), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(&limited, 2), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(&limited, 3), None);
        assert_eq!(policy.delay_for(&timeout, 2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(&ClientError::Auth("401".into()), 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let value = RetryPolicy::default()
            .run("openai-1", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(ClientError::RateLimit("429".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s + 4s of backoff
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_auth_error() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("google-2", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::Auth("bad key".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("anthropic-3", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::Transport("reset".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
