use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AiError;

/// Exponential backoff policy for transient provider errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based), with up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::rng().random_range(0.0..0.25) * capped;
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Run an operation, retrying transient errors with exponential backoff.
/// Rate-limit errors sleep for exactly the advertised duration (plus jitter)
/// instead of the backoff curve. Non-retryable errors return immediately.
pub async fn with_retry<T, F, Fut>(operation: &str, policy: RetryPolicy, mut f: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = match &e {
                    AiError::RateLimited { retry_after_secs } => {
                        let jitter = rand::rng().random_range(0.0..1.0);
                        Duration::from_secs_f64(*retry_after_secs as f64 + jitter)
                    }
                    _ => policy.delay_for_attempt(attempt),
                };
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        // Jitter adds at most 25%, so check the floor of each delay.
        assert!(policy.delay_for_attempt(1) >= Duration::from_secs(1));
        assert!(policy.delay_for_attempt(2) >= Duration::from_secs(2));
        assert!(policy.delay_for_attempt(3) >= Duration::from_secs(4));
        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(75));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result = with_retry("test", policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AiError::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AiError::Provider {
                    status: 400,
                    body: "bad request".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result: Result<(), _> = with_retry("test", policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::Transient("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
