//! Unified error type for workflow execution
//!
//! Every failure the executor can surface carries a machine-readable
//! [`ErrorCode`] plus structured details on the variant itself, so callers can
//! dispatch on the code without parsing messages.

use thiserror::Error;

/// Machine-readable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A node's step delegate raised and nothing recovered it
    ExecutionFailed,
    /// No node is failed, none is ready, and some remain pending
    ExecutionDeadlock,
    /// An element carried a `type` tag the executor does not know
    UnknownNodeType,
    /// Retry policy configured with zero attempts
    RetryExhausted,
    /// A step's deadline elapsed with no fallback configured
    StepTimeout,
    /// An `items` expression resolved to something other than an array
    InvalidItemsType,
    /// A while loop hit its iteration cap
    MaxIterationsExceeded,
    /// A `dependsOn` entry references a node that does not exist
    InvalidDependency,
    /// The dependency graph contains a cycle
    DependencyCycle,
    /// A condition, items expression, or element definition was rejected
    Expression,
    /// The caller's cancellation token fired between wavefronts
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::ExecutionDeadlock => "EXECUTION_DEADLOCK",
            Self::UnknownNodeType => "UNKNOWN_NODE_TYPE",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::StepTimeout => "STEP_TIMEOUT",
            Self::InvalidItemsType => "INVALID_ITEMS_TYPE",
            Self::MaxIterationsExceeded => "MAX_ITERATIONS_EXCEEDED",
            Self::InvalidDependency => "INVALID_DEPENDENCY",
            Self::DependencyCycle => "DEPENDENCY_CYCLE",
            Self::Expression => "EXPRESSION_ERROR",
            Self::Cancelled => "EXECUTION_CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type for the workflow executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// A node failed and no enclosing try block caught it.
    #[error("node {node_id} failed: {message}")]
    ExecutionFailed {
        node_id: String,
        message: String,
        #[source]
        source: Option<Box<ExecutorError>>,
    },

    /// A step delegate raised inside a node. Carries the delegate's own
    /// error code so retry filters and catch handlers can inspect it.
    #[error("{message}")]
    StepFailed {
        code: Option<String>,
        message: String,
    },

    /// Pending nodes remain but none is ready and none has failed.
    #[error("workflow deadlocked: {} completed, {} still pending", completed.len(), pending.len())]
    Deadlock {
        completed: Vec<String>,
        pending: Vec<String>,
    },

    #[error("unknown node type: {type_tag:?}")]
    UnknownNodeType { type_tag: String },

    /// Degenerate retry configuration: zero attempts means the delegate is
    /// never invoked. Normal exhaustion re-raises the last step error unwrapped.
    #[error("retry policy has zero attempts, step was never executed")]
    RetryExhausted,

    #[error("step timed out after {timeout_ms}ms")]
    StepTimeout { timeout_ms: u64 },

    #[error("items expression {expression:?} resolved to {actual}, expected an array")]
    InvalidItemsType { expression: String, actual: String },

    #[error("while loop exceeded {limit} iterations")]
    MaxIterationsExceeded { limit: u32 },

    #[error("node {node_id} depends on unknown node {dependency:?}")]
    InvalidDependency { node_id: String, dependency: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("expression error: {message}")]
    Expression { message: String },

    #[error("execution cancelled")]
    Cancelled,
}

impl ExecutorError {
    /// The machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ExecutionFailed { .. } | Self::StepFailed { .. } => ErrorCode::ExecutionFailed,
            Self::Deadlock { .. } => ErrorCode::ExecutionDeadlock,
            Self::UnknownNodeType { .. } => ErrorCode::UnknownNodeType,
            Self::RetryExhausted => ErrorCode::RetryExhausted,
            Self::StepTimeout { .. } => ErrorCode::StepTimeout,
            Self::InvalidItemsType { .. } => ErrorCode::InvalidItemsType,
            Self::MaxIterationsExceeded { .. } => ErrorCode::MaxIterationsExceeded,
            Self::InvalidDependency { .. } => ErrorCode::InvalidDependency,
            Self::DependencyCycle { .. } => ErrorCode::DependencyCycle,
            Self::Expression { .. } => ErrorCode::Expression,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Create an expression error.
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    /// The delegate-supplied error code, when this error originated in a step.
    pub fn step_code(&self) -> Option<&str> {
        match self {
            Self::StepFailed { code, .. } => code.as_deref(),
            Self::ExecutionFailed { source, .. } => source.as_ref().and_then(|e| e.step_code()),
            _ => None,
        }
    }
}
