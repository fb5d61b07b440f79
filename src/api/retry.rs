//! Automatic retry with exponential backoff and jitter.
//!
//! Retries transient failures (429, 5xx, network timeouts) with configurable
//! exponential backoff. Two classes of error are never retried: window
//! overflow ([`LlmError::ContextLengthExceeded`]), which no amount of
//! retrying can fix, and permanent request errors (400, 401).

use crate::ChatCompletion;
use crate::api::client::{LlmError, ModelClient};
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number; not worth
            // pulling in rand just for this.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                3 => 0.85,
                _ => 0.80,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Whether an error is worth retrying.
///
/// Timeouts always are. API errors are retried when they carry a transient
/// HTTP status or a network-level failure phrase. Window overflow never is.
pub fn is_transient(error: &LlmError) -> bool {
    match error {
        LlmError::Timeout(_) => true,
        LlmError::ContextLengthExceeded(_) => false,
        LlmError::Api(message) => {
            let transient_statuses = ["429", "500", "502", "503", "504"];
            if transient_statuses
                .iter()
                .any(|s| message.contains(&format!("HTTP {s}")))
            {
                return true;
            }
            let lower = message.to_lowercase();
            [
                "request failed:",
                "connection reset",
                "connection refused",
                "timed out",
                "broken pipe",
                "network",
            ]
            .iter()
            .any(|p| lower.contains(p))
        }
    }
}

/// Invoke the model, retrying transient failures with backoff.
///
/// Returns the first success, or the last error once retries are exhausted
/// or the error is not transient.
pub async fn invoke_with_retry(
    client: &dyn ModelClient,
    request: &crate::ChatRequest,
    retry: &RetryConfig,
) -> Result<ChatCompletion, LlmError> {
    let mut attempt = 0;
    loop {
        match client.invoke(request).await {
            Ok(completion) => return Ok(completion),
            Err(error) => {
                if !is_transient(&error) || attempt >= retry.max_retries {
                    return Err(error);
                }
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    "Model call failed (attempt {}/{}), retrying in {:.1}s: {error}",
                    attempt + 1,
                    retry.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::ClientFuture;
    use crate::{ChatCompletion, ChatRequest};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(5)
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_reduces_delay() {
        let with = RetryConfig {
            jitter: true,
            ..RetryConfig::with_retries(3)
        };
        let without = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(3)
        };
        assert!(with.delay_for_attempt(2) <= without.delay_for_attempt(2));
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient(&LlmError::Timeout(Duration::from_secs(120))));
        assert!(is_transient(&LlmError::Api(
            "OpenRouter API HTTP 429: rate limited".into()
        )));
        assert!(is_transient(&LlmError::Api(
            "request failed: connection reset".into()
        )));
        assert!(!is_transient(&LlmError::Api(
            "OpenRouter API HTTP 400: bad request".into()
        )));
        assert!(!is_transient(&LlmError::ContextLengthExceeded(
            "too long".into()
        )));
    }

    struct FlakyClient {
        failures: AtomicU32,
    }

    impl ModelClient for FlakyClient {
        fn invoke<'a>(&'a self, _request: &'a ChatRequest) -> ClientFuture<'a> {
            Box::pin(async move {
                if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                    Err(LlmError::Timeout(Duration::from_millis(1)))
                } else {
                    Ok(ChatCompletion {
                        content: Some("ok".into()),
                        ..Default::default()
                    })
                }
            })
        }
    }

    #[tokio::test]
    async fn retries_timeouts_then_succeeds() {
        let client = FlakyClient {
            failures: AtomicU32::new(2),
        };
        let config = RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result = invoke_with_retry(&client, &ChatRequest::default(), &config).await;
        assert_eq!(result.unwrap().content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn window_overflow_is_never_retried() {
        struct OverflowClient {
            calls: AtomicU32,
        }
        impl ModelClient for OverflowClient {
            fn invoke<'a>(&'a self, _request: &'a ChatRequest) -> ClientFuture<'a> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(LlmError::ContextLengthExceeded("overflow".into())) })
            }
        }

        let client = OverflowClient {
            calls: AtomicU32::new(0),
        };
        let config = RetryConfig::with_retries(5);
        let result = invoke_with_retry(&client, &ChatRequest::default(), &config).await;
        assert!(matches!(result, Err(LlmError::ContextLengthExceeded(_))));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
