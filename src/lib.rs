//! Graph-based workflow executor
//!
//! Turns a declarative list of workflow steps and control-flow blocks
//! (parallel, branch, foreach, try/catch, switch, while, map-reduce) into a
//! dependency graph and drives it to completion with wavefront scheduling,
//! retry, and timeout semantics. The actual work of a step is performed by a
//! host-supplied [`StepDelegate`]; the executor only reasons about ordering,
//! concurrency, and failure propagation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use wavefront::{FlowElement, WorkflowExecutor};
//! # use wavefront::{ResultMap, StepDelegate, StepFailure};
//! # use wavefront::flow::StepDef;
//! # struct MyDelegate;
//! # #[async_trait::async_trait]
//! # impl StepDelegate for MyDelegate {
//! #     async fn execute(
//! #         &self,
//! #         step: &StepDef,
//! #         _context: &serde_json::Value,
//! #         _results: &ResultMap,
//! #         _cancel: &tokio_util::sync::CancellationToken,
//! #     ) -> Result<serde_json::Value, StepFailure> {
//! #         Ok(json!(step.agent))
//! #     }
//! # }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let flow: Vec<FlowElement> = serde_json::from_value(json!([
//!     {"agent": "fetch"},
//!     {"agent": "summarize", "dependsOn": ["node_0"]}
//! ]))?;
//!
//! let executor = WorkflowExecutor::new(Arc::new(MyDelegate));
//! let results = executor.execute(flow, json!({"topic": "rust"})).await?;
//! println!("{:?}", results.get("node_1"));
//! # Ok(())
//! # }
//! ```

pub mod delegate;
pub mod error;
pub mod exec;
pub mod expression;
pub mod flow;
pub mod graph;

pub use delegate::{ResultMap, StepDelegate, StepFailure};
pub use error::{ErrorCode, ExecutorError};
pub use exec::WorkflowExecutor;
pub use flow::FlowElement;
