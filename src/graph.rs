//! Execution graph construction and validation
//!
//! Converts the flat list of top-level flow elements into a dependency graph.
//! Node IDs are assigned sequentially in input order (`node_0`, `node_1`, …)
//! and stay stable for the lifetime of one execution. Dangling dependency
//! references and dependency cycles are rejected at build time, so the
//! scheduler's runtime deadlock report is a safety net rather than the primary
//! diagnostic.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ExecutorError;
use crate::flow::FlowElement;

/// Lifecycle of one node. Transitions are monotonic:
/// `Pending → Running → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Execution-tracking wrapper around one top-level flow element.
#[derive(Debug)]
pub struct ExecutionNode {
    pub id: String,
    pub element: FlowElement,
    pub dependencies: Vec<String>,
    pub status: NodeStatus,
    /// Present only once the node completed
    pub result: Option<Value>,
    /// Present only once the node failed
    pub error: Option<String>,
    /// Informational wall-clock timestamps
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionNode {
    fn new(id: String, element: FlowElement) -> Self {
        let dependencies = element.depends_on().to_vec();
        Self {
            id,
            element,
            dependencies,
            status: NodeStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// The full set of execution nodes for one `execute()` call, in input order,
/// plus a reverse-adjacency map used only for diagnostics.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    nodes: Vec<ExecutionNode>,
    index: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
}

impl ExecutionGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in input order.
    pub fn nodes(&self) -> &[ExecutionNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn node_at(&self, index: usize) -> &ExecutionNode {
        &self.nodes[index]
    }

    pub(crate) fn node_at_mut(&mut self, index: usize) -> &mut ExecutionNode {
        &mut self.nodes[index]
    }

    /// Node IDs that depend on the given node. Diagnostics only; traversal is
    /// dependency-driven.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }

    /// Indices of pending nodes whose dependencies are all completed, in
    /// input order.
    pub(crate) fn ready_indices(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.status == NodeStatus::Pending
                    && node
                        .dependencies
                        .iter()
                        .all(|dep| self.status_of(dep) == Some(NodeStatus::Completed))
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn ids_with_status(&self, status: NodeStatus) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.id.clone())
            .collect()
    }
}

/// Builds and validates an [`ExecutionGraph`] from a flow element list.
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn build(flow: Vec<FlowElement>) -> Result<ExecutionGraph, ExecutorError> {
        let graph = Self::assemble(flow)?;
        Self::check_cycles(&graph)?;
        Ok(graph)
    }

    /// Assemble nodes and edges without the cycle check. Used by tests to
    /// exercise the scheduler's runtime deadlock safety net.
    #[cfg(test)]
    pub(crate) fn build_unchecked(flow: Vec<FlowElement>) -> Result<ExecutionGraph, ExecutorError> {
        Self::assemble(flow)
    }

    fn assemble(flow: Vec<FlowElement>) -> Result<ExecutionGraph, ExecutorError> {
        let mut graph = ExecutionGraph::default();

        for (i, element) in flow.into_iter().enumerate() {
            let id = format!("node_{i}");
            graph.index.insert(id.clone(), i);
            graph.nodes.push(ExecutionNode::new(id, element));
        }

        for node in &graph.nodes {
            for dep in &node.dependencies {
                if !graph.index.contains_key(dep) {
                    return Err(ExecutorError::InvalidDependency {
                        node_id: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        Ok(graph)
    }

    /// Depth-first cycle check over dependency edges. Fails with the specific
    /// cycle path instead of deferring to the runtime deadlock report.
    fn check_cycles(graph: &ExecutionGraph) -> Result<(), ExecutorError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            graph: &ExecutionGraph,
            index: usize,
            marks: &mut [Mark],
            stack: &mut Vec<String>,
        ) -> Result<(), ExecutorError> {
            marks[index] = Mark::InProgress;
            let node = graph.node_at(index);
            stack.push(node.id.clone());

            for dep in &node.dependencies {
                let Some(&dep_index) = graph.index.get(dep) else {
                    continue;
                };
                match marks[dep_index] {
                    Mark::Done => {}
                    Mark::Unvisited => visit(graph, dep_index, marks, stack)?,
                    Mark::InProgress => {
                        // close the loop in the reported path
                        let start = stack.iter().position(|id| id == dep).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..].to_vec();
                        path.push(dep.clone());
                        return Err(ExecutorError::DependencyCycle { path });
                    }
                }
            }

            stack.pop();
            marks[index] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; graph.len()];
        let mut stack = Vec::new();
        for index in 0..graph.len() {
            if marks[index] == Mark::Unvisited {
                visit(graph, index, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }
}
