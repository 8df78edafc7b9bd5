//! Flow element model
//!
//! Tagged-variant data types for workflow steps and control blocks, matching
//! the wire shapes produced by the workflow-definition parser. A bare object
//! with an `agent` field is a step; control blocks carry a `type` tag
//! (`parallel`, `branch`, `foreach`, `try`, `switch`, `while`, `map-reduce`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ExecutorError;

/// One unit of a workflow definition: a single step or a control-flow block.
///
/// The enum is closed: dispatch over element kinds is an exhaustive match, so
/// adding a block type is a compile-time exercise. Unknown `type` tags are
/// rejected during deserialization with `UNKNOWN_NODE_TYPE`.
#[derive(Debug, Clone)]
pub enum FlowElement {
    Step(StepDef),
    Parallel(ParallelBlock),
    Branch(BranchBlock),
    ForEach(ForEachBlock),
    Try(TryBlock),
    Switch(SwitchBlock),
    While(WhileBlock),
    MapReduce(MapReduceBlock),
}

impl FlowElement {
    /// The wire tag for this element kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Parallel(_) => "parallel",
            Self::Branch(_) => "branch",
            Self::ForEach(_) => "foreach",
            Self::Try(_) => "try",
            Self::Switch(_) => "switch",
            Self::While(_) => "while",
            Self::MapReduce(_) => "map-reduce",
        }
    }

    /// Declared graph dependencies. Only meaningful on top-level elements;
    /// nested elements run inline inside their parent's control construct.
    pub fn depends_on(&self) -> &[String] {
        match self {
            Self::Step(e) => &e.depends_on,
            Self::Parallel(e) => &e.depends_on,
            Self::Branch(e) => &e.depends_on,
            Self::ForEach(e) => &e.depends_on,
            Self::Try(e) => &e.depends_on,
            Self::Switch(e) => &e.depends_on,
            Self::While(e) => &e.depends_on,
            Self::MapReduce(e) => &e.depends_on,
        }
    }

    /// Build a flow element from a raw JSON value, dispatching on the `type`
    /// tag. This is the seam where an unknown block type surfaces as a
    /// structured `UNKNOWN_NODE_TYPE` error instead of a generic serde message.
    pub fn from_value(value: Value) -> Result<Self, ExecutorError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        match tag.as_deref() {
            None | Some("step") => {
                let mut value = value;
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("type");
                }
                Ok(Self::Step(serde_json::from_value(value).map_err(element_parse_error)?))
            }
            Some("parallel") => Ok(Self::Parallel(
                serde_json::from_value(value).map_err(element_parse_error)?,
            )),
            Some("branch") => Ok(Self::Branch(
                serde_json::from_value(value).map_err(element_parse_error)?,
            )),
            Some("foreach") => Ok(Self::ForEach(
                serde_json::from_value(value).map_err(element_parse_error)?,
            )),
            Some("try") => Ok(Self::Try(serde_json::from_value(value).map_err(element_parse_error)?)),
            Some("switch") => Ok(Self::Switch(
                serde_json::from_value(value).map_err(element_parse_error)?,
            )),
            Some("while") => Ok(Self::While(
                serde_json::from_value(value).map_err(element_parse_error)?,
            )),
            Some("map-reduce") => Ok(Self::MapReduce(
                serde_json::from_value(value).map_err(element_parse_error)?,
            )),
            Some(other) => Err(ExecutorError::UnknownNodeType {
                type_tag: other.to_string(),
            }),
        }
    }
}

/// Nested elements deserialize through serde, which flattens their structured
/// errors into message strings. Recover the unknown-type code from the message
/// so it survives any nesting depth.
fn element_parse_error(e: serde_json::Error) -> ExecutorError {
    let message = e.to_string();
    if let Some(tag) = message
        .split("unknown node type: \"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
    {
        return ExecutorError::UnknownNodeType {
            type_tag: tag.to_string(),
        };
    }
    ExecutorError::expression(format!("invalid flow element: {message}"))
}

impl<'de> Deserialize<'de> for FlowElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for FlowElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Tagged<'a, T> {
            r#type: &'static str,
            #[serde(flatten)]
            inner: &'a T,
        }

        match self {
            Self::Step(e) => e.serialize(serializer),
            Self::Parallel(e) => Tagged { r#type: "parallel", inner: e }.serialize(serializer),
            Self::Branch(e) => Tagged { r#type: "branch", inner: e }.serialize(serializer),
            Self::ForEach(e) => Tagged { r#type: "foreach", inner: e }.serialize(serializer),
            Self::Try(e) => Tagged { r#type: "try", inner: e }.serialize(serializer),
            Self::Switch(e) => Tagged { r#type: "switch", inner: e }.serialize(serializer),
            Self::While(e) => Tagged { r#type: "while", inner: e }.serialize(serializer),
            Self::MapReduce(e) => Tagged { r#type: "map-reduce", inner: e }.serialize(serializer),
        }
    }
}

/// A single workflow step: an agent/operation reference plus execution
/// features (when-guard, retry policy, timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    /// Agent or operation reference, opaque to the executor
    pub agent: String,

    /// Input-mapping expression, interpreted by the step delegate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Guard condition; false skips the step without executing it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<OnTimeout>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Retry policy with configurable backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Initial delay between attempts, milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,

    /// Delay ceiling, milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,

    /// Only retry errors whose delegate code is in this list; errors without
    /// a code, or with a code outside the list, propagate immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<Vec<String>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: BackoffStrategy::default(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            retry_on: None,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self
                .initial_delay
                .saturating_mul(u64::from(attempt) + 1)
                .min(self.max_delay),
            BackoffStrategy::Exponential => self
                .initial_delay
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay),
        };
        Duration::from_millis(ms)
    }
}

/// Backoff strategies for retry delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

/// Behavior when a step's deadline elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnTimeout {
    /// When false and a fallback is present, the fallback value replaces the
    /// timeout error
    #[serde(default = "default_true")]
    pub error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
}

/// Concurrent execution of a set of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelBlock {
    pub steps: Vec<StepDef>,

    #[serde(default)]
    pub wait_for: WaitFor,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitFor {
    #[default]
    All,
    Any,
}

/// Conditional execution of one of two sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchBlock {
    pub condition: String,

    pub then: Vec<FlowElement>,

    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Vec<FlowElement>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Per-item execution of a step over a resolved array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForEachBlock {
    /// Expression resolving to the array of items
    pub items: String,

    pub step: StepDef,

    /// Batch size; absent means all items in one batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Checked after each batch; true stops the loop early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_when: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Protected region with optional recovery and cleanup sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TryBlock {
    pub steps: Vec<FlowElement>,

    /// Runs with the error bound into context; its results recover the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<FlowElement>>,

    /// Always runs after try/catch; its result is discarded but its own
    /// failures are not suppressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finally: Option<Vec<FlowElement>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Case dispatch on a stringified value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBlock {
    pub value: String,

    #[serde(default)]
    pub cases: HashMap<String, Vec<FlowElement>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Vec<FlowElement>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Condition-guarded loop with a hard iteration cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhileBlock {
    pub condition: String,

    pub steps: Vec<FlowElement>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Batched map phase over a resolved array, followed by a single reduce step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceBlock {
    pub items: String,

    pub map: StepDef,

    pub reduce: StepDef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_iterations() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}
