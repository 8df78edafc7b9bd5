//! Workflow executor: wavefront scheduler core
//!
//! Drives an [`ExecutionGraph`] to completion in dependency order. Each round
//! launches every currently-ready node concurrently and waits for the whole
//! wavefront to settle before recording results and recomputing readiness.
//! Round-based scheduling trades a little cross-wavefront concurrency for
//! simple reasoning: a node's dependencies are fully completed, nested work
//! included, before it launches.

mod node;
mod retry;
mod timeout;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::delegate::{ResultMap, StepDelegate};
use crate::error::ExecutorError;
use crate::expression::ExpressionEvaluator;
use crate::flow::FlowElement;
use crate::graph::{ExecutionGraph, GraphBuilder, NodeStatus};

use node::NodeExecutor;

/// Executes workflows against a host-supplied step delegate.
///
/// One `execute()` call builds one graph, runs it, and discards it; the
/// executor itself is reusable and cheap to clone around via `Arc`.
pub struct WorkflowExecutor {
    delegate: Arc<dyn StepDelegate>,
    cancel: CancellationToken,
}

impl WorkflowExecutor {
    pub fn new(delegate: Arc<dyn StepDelegate>) -> Self {
        Self {
            delegate,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a caller-owned cancellation token. Cancelling it stops the
    /// execution at the next wavefront boundary and is propagated to step
    /// delegates through child tokens.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute a flow to completion. Returns the map from node ID to node
    /// result on full success, or the first structured failure otherwise.
    pub async fn execute(
        &self,
        flow: Vec<FlowElement>,
        context: Value,
    ) -> Result<ResultMap, ExecutorError> {
        let mut graph = GraphBuilder::build(flow)?;
        self.run_graph(&mut graph, &context).await
    }

    async fn run_graph(
        &self,
        graph: &mut ExecutionGraph,
        context: &Value,
    ) -> Result<ResultMap, ExecutorError> {
        let evaluator = ExpressionEvaluator::new();
        let mut results = ResultMap::new();
        let mut failures: HashMap<usize, ExecutorError> = HashMap::new();
        let mut round: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            let ready = graph.ready_indices();
            if ready.is_empty() {
                return finish(graph, results, failures);
            }

            round += 1;
            debug!(round, width = ready.len(), "launching wavefront");

            for &i in &ready {
                let node = graph.node_at_mut(i);
                node.status = NodeStatus::Running;
                node.started_at = Some(Utc::now());
            }

            let executor = NodeExecutor {
                delegate: self.delegate.as_ref(),
                evaluator: &evaluator,
                results: &results,
                cancel: &self.cancel,
            };

            let settled = join_all(ready.iter().map(|&i| {
                let element = &graph.node_at(i).element;
                async move { (i, executor.execute_element(element, context).await) }
            }))
            .await;

            for (i, outcome) in settled {
                let node = graph.node_at_mut(i);
                node.finished_at = Some(Utc::now());
                match outcome {
                    Ok(value) => {
                        debug!(node_id = %node.id, "node completed");
                        results.insert(node.id.clone(), value.clone());
                        node.result = Some(value);
                        node.status = NodeStatus::Completed;
                    }
                    Err(error) => {
                        warn!(node_id = %node.id, error = %error, "node failed");
                        node.error = Some(error.to_string());
                        node.status = NodeStatus::Failed;
                        failures.insert(i, error);
                    }
                }
            }
        }
    }
}

/// Terminal analysis once no node is ready: report the first failed node in
/// iteration order, then deadlock, then clean success.
///
/// Delegate failures are wrapped as `EXECUTION_FAILED` naming the node;
/// structural errors (timeout, items type, iteration cap, …) keep their own
/// code and propagate unwrapped.
fn finish(
    graph: &ExecutionGraph,
    results: ResultMap,
    mut failures: HashMap<usize, ExecutorError>,
) -> Result<ResultMap, ExecutorError> {
    for (i, node) in graph.nodes().iter().enumerate() {
        if node.status == NodeStatus::Failed {
            return Err(match failures.remove(&i) {
                Some(inner @ ExecutorError::StepFailed { .. }) => {
                    ExecutorError::ExecutionFailed {
                        node_id: node.id.clone(),
                        message: inner.to_string(),
                        source: Some(Box::new(inner)),
                    }
                }
                Some(structural) => structural,
                None => ExecutorError::ExecutionFailed {
                    node_id: node.id.clone(),
                    message: node
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                    source: None,
                },
            });
        }
    }

    let pending = graph.ids_with_status(NodeStatus::Pending);
    if !pending.is_empty() {
        return Err(ExecutorError::Deadlock {
            completed: graph.ids_with_status(NodeStatus::Completed),
            pending,
        });
    }

    Ok(results)
}
