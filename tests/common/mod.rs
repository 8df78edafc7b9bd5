//! Shared mock step delegate for integration tests

// not every suite exercises every helper
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use wavefront::flow::StepDef;
use wavefront::{FlowElement, ResultMap, StepDelegate, StepFailure};

/// Scriptable delegate: per-agent canned outputs, failure budgets, and
/// latencies, with invocation and concurrency tracking.
#[derive(Default)]
pub struct MockDelegate {
    calls: Mutex<Vec<String>>,
    contexts: Mutex<Vec<(String, Value)>>,
    outputs: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, (usize, Option<String>)>>,
    delays: Mutex<HashMap<String, u64>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fixed output for an agent; the default output echoes the agent name
    /// and any bound `item`.
    pub fn set_output(&self, agent: &str, value: Value) {
        self.outputs.lock().unwrap().insert(agent.to_string(), value);
    }

    /// Make the agent's next `times` invocations fail, optionally with a code.
    pub fn fail_times(&self, agent: &str, times: usize, code: Option<&str>) {
        self.failures
            .lock()
            .unwrap()
            .insert(agent.to_string(), (times, code.map(str::to_string)));
    }

    pub fn set_delay_ms(&self, agent: &str, ms: u64) {
        self.delays.lock().unwrap().insert(agent.to_string(), ms);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Contexts seen by a given agent, in call order.
    pub fn contexts_for(&self, agent: &str) -> Vec<Value> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepDelegate for MockDelegate {
    async fn execute(
        &self,
        step: &StepDef,
        context: &Value,
        _results: &ResultMap,
        cancel: &CancellationToken,
    ) -> Result<Value, StepFailure> {
        self.calls.lock().unwrap().push(step.agent.clone());
        self.contexts
            .lock()
            .unwrap()
            .push((step.agent.clone(), context.clone()));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&step.agent).copied();
        if let Some(ms) = delay {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                _ = cancel.cancelled() => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(StepFailure::new("cancelled").with_code("CANCELLED"));
                }
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure_code = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&step.agent) {
                Some((remaining, code)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(code.clone())
                }
                _ => None,
            }
        };
        if let Some(code) = failure_code {
            let mut failure = StepFailure::new(format!("{} failed", step.agent));
            if let Some(code) = code {
                failure = failure.with_code(code);
            }
            return Err(failure);
        }

        let preset = self.outputs.lock().unwrap().get(&step.agent).cloned();
        Ok(preset.unwrap_or_else(|| match context.get("item") {
            Some(item) => json!({"agent": step.agent, "item": item}),
            None => json!({"agent": step.agent}),
        }))
    }
}

/// Parse a flow element from inline JSON.
pub fn element(value: Value) -> FlowElement {
    FlowElement::from_value(value).expect("valid flow element")
}
