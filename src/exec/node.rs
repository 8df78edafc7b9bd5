//! Node-type executors
//!
//! One execution strategy per flow-element kind. Control blocks recurse into
//! nested elements through [`NodeExecutor::execute_element`], which boxes the
//! future to keep recursion finite. Executors read the results map but never
//! write it; recording is the scheduler's job.

use futures::future::{join_all, select_all, BoxFuture};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::delegate::{ResultMap, StepDelegate};
use crate::error::ExecutorError;
use crate::expression::{ExpressionEvaluator, Scope};
use crate::flow::{
    BranchBlock, FlowElement, ForEachBlock, MapReduceBlock, ParallelBlock, StepDef, SwitchBlock,
    TryBlock, WaitFor, WhileBlock,
};

/// Shared execution environment for one wavefront. All fields are borrows
/// owned by the scheduler; the struct is `Copy` so nested executors can
/// rescope the cancellation token cheaply.
#[derive(Clone, Copy)]
pub(crate) struct NodeExecutor<'a> {
    pub delegate: &'a dyn StepDelegate,
    pub evaluator: &'a ExpressionEvaluator,
    pub results: &'a ResultMap,
    pub cancel: &'a CancellationToken,
}

impl<'a> NodeExecutor<'a> {
    fn scope<'b>(&self, context: &'b Value) -> Scope<'b>
    where
        'a: 'b,
    {
        Scope::new(context, self.results)
    }

    /// Execute one flow element against the given context.
    pub(crate) fn execute_element<'b>(
        &self,
        element: &'b FlowElement,
        context: &'b Value,
    ) -> BoxFuture<'b, Result<Value, ExecutorError>>
    where
        'a: 'b,
    {
        let this = *self;
        Box::pin(async move {
            if this.cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            match element {
                FlowElement::Step(step) => this.execute_step(step, context).await,
                FlowElement::Parallel(block) => this.execute_parallel(block, context).await,
                FlowElement::Branch(block) => this.execute_branch(block, context).await,
                FlowElement::ForEach(block) => this.execute_foreach(block, context).await,
                FlowElement::Try(block) => this.execute_try(block, context).await,
                FlowElement::Switch(block) => this.execute_switch(block, context).await,
                FlowElement::While(block) => this.execute_while(block, context).await,
                FlowElement::MapReduce(block) => this.execute_map_reduce(block, context).await,
            }
        })
    }

    /// Execute a sequence of elements in order, collecting their results.
    async fn execute_sequence(
        &self,
        elements: &[FlowElement],
        context: &Value,
    ) -> Result<Vec<Value>, ExecutorError> {
        let mut outputs = Vec::with_capacity(elements.len());
        for element in elements {
            outputs.push(self.execute_element(element, context).await?);
        }
        Ok(outputs)
    }

    /// Step with features: when-guard, then retry or timeout around the
    /// delegate. Retry and timeout are alternatives, not layers; retry wins
    /// when both are configured.
    async fn execute_step(&self, step: &StepDef, context: &Value) -> Result<Value, ExecutorError> {
        if let Some(when) = &step.when {
            if !self.evaluator.eval_condition(when, self.scope(context))? {
                debug!(agent = %step.agent, "when guard false, skipping step");
                return Ok(json!({"skipped": true}));
            }
        }

        if let Some(retry) = &step.retry {
            let (delegate, results, cancel) = (self.delegate, self.results, self.cancel);
            super::retry::run(retry, move || {
                delegate.execute(step, context, results, cancel)
            })
            .await
        } else if let Some(timeout_ms) = step.timeout {
            let child = self.cancel.child_token();
            super::timeout::run(
                timeout_ms,
                step.on_timeout.as_ref(),
                &child,
                self.delegate.execute(step, context, self.results, &child),
            )
            .await
        } else {
            self.delegate
                .execute(step, context, self.results, self.cancel)
                .await
                .map_err(Into::into)
        }
    }

    async fn execute_parallel(
        &self,
        block: &ParallelBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        match block.wait_for {
            WaitFor::All => {
                let settled = join_all(
                    block
                        .steps
                        .iter()
                        .map(|step| self.execute_step(step, context)),
                )
                .await;
                let mut outputs = Vec::with_capacity(settled.len());
                for result in settled {
                    outputs.push(result?);
                }
                Ok(Value::Array(outputs))
            }
            WaitFor::Any => {
                if block.steps.is_empty() {
                    return Ok(Value::Array(Vec::new()));
                }
                // losers are dropped and their shared token cancelled so
                // delegate-side work can clean up
                let block_cancel = self.cancel.child_token();
                let scoped = NodeExecutor {
                    cancel: &block_cancel,
                    ..*self
                };
                let racers: Vec<_> = block
                    .steps
                    .iter()
                    .map(|step| Box::pin(scoped.execute_step(step, context)))
                    .collect();
                let (first, _index, rest) = select_all(racers).await;
                block_cancel.cancel();
                drop(rest);
                first
            }
        }
    }

    async fn execute_branch(
        &self,
        block: &BranchBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        let taken = self
            .evaluator
            .eval_condition(&block.condition, self.scope(context))?;
        let sequence = if taken {
            Some(&block.then)
        } else {
            block.otherwise.as_ref()
        };
        match sequence {
            Some(elements) => Ok(Value::Array(self.execute_sequence(elements, context).await?)),
            None => Ok(Value::Array(Vec::new())),
        }
    }

    async fn execute_foreach(
        &self,
        block: &ForEachBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        let items = self.resolve_items(&block.items, context)?;
        let batch_size = effective_batch(block.max_concurrency, items.len());

        let mut collected = Vec::with_capacity(items.len());
        let mut offset = 0usize;
        for chunk in items.chunks(batch_size) {
            let settled = join_all(chunk.iter().enumerate().map(|(j, item)| {
                let item_context = with_bindings(
                    context,
                    &[("item", item.clone()), ("index", json!(offset + j))],
                );
                async move { self.execute_step(&block.step, &item_context).await }
            }))
            .await;
            for result in settled {
                collected.push(result?);
            }
            offset += chunk.len();

            if let Some(break_when) = &block.break_when {
                if self.evaluator.eval_condition(break_when, self.scope(context))? {
                    debug!(processed = offset, "foreach break condition met");
                    break;
                }
            }
        }
        Ok(Value::Array(collected))
    }

    async fn execute_try(
        &self,
        block: &TryBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        let body = self.execute_sequence(&block.steps, context).await;
        let outcome = match body {
            Ok(outputs) => Ok(Value::Array(outputs)),
            Err(error) => match &block.catch {
                Some(handler) => {
                    debug!(error = %error, "try body failed, running catch");
                    // prefer the delegate's own code over the generic wrapper
                    let code = error.step_code().unwrap_or(error.code().as_str());
                    let error_context = with_bindings(
                        context,
                        &[(
                            "error",
                            json!({
                                "code": code,
                                "message": error.to_string(),
                            }),
                        )],
                    );
                    self.execute_sequence(handler, &error_context)
                        .await
                        .map(Value::Array)
                }
                None => Err(error),
            },
        };

        // finally always runs; its result is discarded but its failures are not
        if let Some(cleanup) = &block.finally {
            self.execute_sequence(cleanup, context).await?;
        }
        outcome
    }

    async fn execute_switch(
        &self,
        block: &SwitchBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        let value = self.evaluator.eval_value(&block.value, self.scope(context))?;
        let key = case_key(&value);
        let sequence = block.cases.get(&key).or(block.default.as_ref());
        match sequence {
            Some(elements) => Ok(Value::Array(self.execute_sequence(elements, context).await?)),
            // no matching case and no default is an explicit no-op
            None => Ok(Value::Null),
        }
    }

    async fn execute_while(
        &self,
        block: &WhileBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        let mut iterations = Vec::new();
        let mut count: u32 = 0;
        loop {
            let iter_context = with_bindings(context, &[("iteration", json!(count))]);
            if !self
                .evaluator
                .eval_condition(&block.condition, self.scope(&iter_context))?
            {
                break;
            }
            if count >= block.max_iterations {
                return Err(ExecutorError::MaxIterationsExceeded {
                    limit: block.max_iterations,
                });
            }
            let outputs = self.execute_sequence(&block.steps, &iter_context).await?;
            iterations.push(Value::Array(outputs));
            count += 1;
        }
        Ok(Value::Array(iterations))
    }

    async fn execute_map_reduce(
        &self,
        block: &MapReduceBlock,
        context: &Value,
    ) -> Result<Value, ExecutorError> {
        let items = self.resolve_items(&block.items, context)?;
        let batch_size = effective_batch(block.max_concurrency, items.len());

        let mut mapped = Vec::with_capacity(items.len());
        let mut offset = 0usize;
        for chunk in items.chunks(batch_size) {
            let settled = join_all(chunk.iter().enumerate().map(|(j, item)| {
                let item_context = with_bindings(
                    context,
                    &[("item", item.clone()), ("index", json!(offset + j))],
                );
                async move { self.execute_step(&block.map, &item_context).await }
            }))
            .await;
            for result in settled {
                mapped.push(result?);
            }
            offset += chunk.len();
        }

        let reduce_context = with_bindings(context, &[("items", Value::Array(mapped))]);
        self.execute_step(&block.reduce, &reduce_context).await
    }

    fn resolve_items(&self, expression: &str, context: &Value) -> Result<Vec<Value>, ExecutorError> {
        match self.evaluator.eval_value(expression, self.scope(context))? {
            Value::Array(items) => Ok(items),
            other => Err(ExecutorError::InvalidItemsType {
                expression: expression.to_string(),
                actual: type_name(&other).to_string(),
            }),
        }
    }
}

fn effective_batch(max_concurrency: Option<usize>, item_count: usize) -> usize {
    max_concurrency
        .filter(|&n| n > 0)
        .unwrap_or(item_count)
        .max(1)
}

/// Clone the context object with extra keys bound. A non-object context is
/// replaced by an object holding only the bindings.
fn with_bindings(context: &Value, bindings: &[(&str, Value)]) -> Value {
    let mut map = match context {
        Value::Object(existing) => existing.clone(),
        _ => Map::new(),
    };
    for (key, value) in bindings {
        map.insert((*key).to_string(), value.clone());
    }
    Value::Object(map)
}

/// Stringified case lookup key: strings match without quotes, everything else
/// via its JSON rendering.
fn case_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_batch() {
        assert_eq!(effective_batch(None, 5), 5);
        assert_eq!(effective_batch(Some(2), 5), 2);
        assert_eq!(effective_batch(Some(0), 5), 5);
        assert_eq!(effective_batch(None, 0), 1);
    }

    #[test]
    fn test_with_bindings_preserves_context() {
        let context = json!({"user": "ada"});
        let bound = with_bindings(&context, &[("item", json!(7))]);
        assert_eq!(bound["user"], "ada");
        assert_eq!(bound["item"], 7);
        // the original is untouched
        assert!(context.get("item").is_none());
    }

    #[test]
    fn test_case_key_rendering() {
        assert_eq!(case_key(&json!("b")), "b");
        assert_eq!(case_key(&json!(2)), "2");
        assert_eq!(case_key(&json!(true)), "true");
        assert_eq!(case_key(&json!(null)), "null");
    }
}
