//! Timeout guard racing a step's execution against a deadline
//!
//! If the deadline wins, the step's future is dropped and its cancellation
//! token fired so delegate-spawned work can clean up. With
//! `onTimeout.error == false` and a configured fallback, the fallback value
//! replaces the timeout error.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::delegate::StepFailure;
use crate::error::ExecutorError;
use crate::flow::OnTimeout;
use serde_json::Value;

pub(crate) async fn run<Fut>(
    timeout_ms: u64,
    on_timeout: Option<&OnTimeout>,
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<Value, ExecutorError>
where
    Fut: Future<Output = Result<Value, StepFailure>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(settled) => settled.map_err(Into::into),
        Err(_elapsed) => {
            cancel.cancel();
            if let Some(config) = on_timeout {
                if !config.error {
                    if let Some(fallback) = &config.fallback {
                        warn!(timeout_ms, "step timed out, substituting fallback value");
                        return Ok(fallback.clone());
                    }
                }
            }
            Err(ExecutorError::StepTimeout { timeout_ms })
        }
    }
}
