//! Retry policy wrapping a single step's execution
//!
//! Delay for 0-based attempt index `a`: fixed → `initialDelay`; linear →
//! `min(initialDelay * (a + 1), maxDelay)`; exponential →
//! `min(initialDelay * 2^a, maxDelay)`. The final attempt's error propagates
//! unwrapped.

use std::future::Future;
use tokio::time::sleep;
use tracing::warn;

use crate::delegate::StepFailure;
use crate::error::ExecutorError;
use crate::flow::RetryConfig;
use serde_json::Value;

/// Run `call` under the retry policy. `retryOn`, when present, limits retries
/// to errors whose delegate code appears in the list; everything else
/// propagates immediately.
pub(crate) async fn run<F, Fut>(
    config: &RetryConfig,
    mut call: F,
) -> Result<Value, ExecutorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, StepFailure>>,
{
    if config.attempts == 0 {
        return Err(ExecutorError::RetryExhausted);
    }

    let mut last_failure: Option<StepFailure> = None;

    for attempt in 0..config.attempts {
        if attempt > 0 {
            let delay = config.delay_for(attempt - 1);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying step after failure"
            );
            sleep(delay).await;
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if !is_retryable(config, &failure) {
                    return Err(failure.into());
                }
                last_failure = Some(failure);
            }
        }
    }

    match last_failure {
        Some(failure) => Err(failure.into()),
        None => Err(ExecutorError::RetryExhausted),
    }
}

fn is_retryable(config: &RetryConfig, failure: &StepFailure) -> bool {
    match &config.retry_on {
        None => true,
        Some(codes) => failure
            .code
            .as_deref()
            .map(|code| codes.iter().any(|c| c == code))
            .unwrap_or(false),
    }
}

impl From<StepFailure> for ExecutorError {
    fn from(failure: StepFailure) -> Self {
        Self::StepFailed {
            code: failure.code,
            message: failure.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = std::sync::Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            attempts: 3,
            initial_delay: 10,
            ..RetryConfig::default()
        };
        let result = run(&config, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(StepFailure::new("transient"))
                } else {
                    Ok(json!("done"))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, json!("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_error_is_unwrapped() {
        let config = RetryConfig {
            attempts: 2,
            initial_delay: 5,
            ..RetryConfig::default()
        };
        let err = run(&config, || async {
            Err::<Value, _>(StepFailure::new("boom").with_code("FATAL"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionFailed);
        assert_eq!(err.step_code(), Some("FATAL"));
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_retry_on_filter_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            attempts: 5,
            initial_delay: 1,
            retry_on: Some(vec!["TRANSIENT".to_string()]),
            ..RetryConfig::default()
        };
        let err = run(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, _>(StepFailure::new("nope").with_code("FATAL")) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.step_code(), Some("FATAL"));
    }

    #[tokio::test]
    async fn test_retry_on_filter_requires_a_code() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            attempts: 5,
            initial_delay: 1,
            retry_on: Some(vec!["TRANSIENT".to_string()]),
            ..RetryConfig::default()
        };
        let _ = run(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, _>(StepFailure::new("codeless")) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_never_calls() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            attempts: 0,
            ..RetryConfig::default()
        };
        let err = run(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!(null)) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(err.code(), ErrorCode::RetryExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_timing() {
        let config = RetryConfig {
            attempts: 3,
            backoff: crate::flow::BackoffStrategy::Exponential,
            initial_delay: 100,
            ..RetryConfig::default()
        };
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = run(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(StepFailure::new("flaky"))
                } else {
                    Ok(json!(n))
                }
            }
        })
        .await
        .unwrap();
        // two failures: 100ms then 200ms of backoff before the third attempt
        assert!(start.elapsed() >= std::time::Duration::from_millis(300));
        assert_eq!(result, json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
