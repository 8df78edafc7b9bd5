//! Step execution delegate
//!
//! The executor never performs a step's work itself. The host system supplies
//! a [`StepDelegate`] that knows how to invoke an agent or operation; the
//! executor hands it the step definition, the current context, and the results
//! accumulated so far, and treats the returned value as opaque.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::flow::StepDef;

/// Results of completed nodes, keyed by node ID.
pub type ResultMap = BTreeMap<String, Value>;

/// Error raised by a step delegate.
///
/// `code` is an optional machine-readable classification (e.g. `"RATE_LIMIT"`)
/// that retry policies match against via `retryOn` and that catch handlers see
/// bound into their context.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepFailure {
    pub code: Option<String>,
    pub message: String,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Executes a single workflow step.
///
/// Implementations should honor `cancel` cooperatively at their own suspension
/// points: the executor cancels it when a timeout race or a `waitFor: "any"`
/// block abandons the step's result.
#[async_trait]
pub trait StepDelegate: Send + Sync {
    async fn execute(
        &self,
        step: &StepDef,
        context: &Value,
        results: &ResultMap,
        cancel: &CancellationToken,
    ) -> Result<Value, StepFailure>;
}
