//! Expression evaluation for workflow conditions and item lists
//!
//! The evaluator walks the parsed expression tree against a [`Scope`] holding
//! the workflow context and the results of completed nodes. Two entry points:
//! [`ExpressionEvaluator::eval_condition`] for boolean guards and
//! [`ExpressionEvaluator::eval_value`] for expressions that produce a value,
//! such as `foreach` item lists and `switch` values.

use serde_json::Value;

use crate::delegate::ResultMap;
use crate::error::ExecutorError;

mod parser;

pub use parser::{parse_expression, ComparisonOp, Expression, LogicalOp};

/// The data visible to an expression: the accumulated context object and the
/// results of completed nodes. Paths root at `context` or `results`.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub context: &'a Value,
    pub results: &'a ResultMap,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a Value, results: &'a ResultMap) -> Self {
        Self { context, results }
    }

    /// Resolve a dotted path. Missing paths resolve to null rather than
    /// erroring so that guards over optional data compose cleanly.
    fn resolve(&self, segments: &[String]) -> Result<Value, ExecutorError> {
        let (root, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Ok(Value::Null),
        };

        match root.as_str() {
            "context" => Ok(lookup(self.context, rest)),
            "results" => match rest.split_first() {
                None => Ok(Value::Object(
                    self.results
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )),
                Some((node_id, tail)) => Ok(self
                    .results
                    .get(node_id)
                    .map(|value| lookup(value, tail))
                    .unwrap_or(Value::Null)),
            },
            other => Err(ExecutorError::expression(format!(
                "path must root at 'context' or 'results', got {other:?}"
            ))),
        }
    }
}

/// Traverse a JSON value by path segments; numeric segments index arrays.
fn lookup(value: &Value, segments: &[String]) -> Value {
    let mut current = value;
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Evaluates conditions and item-list expressions against a [`Scope`].
#[derive(Debug, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition string to a boolean.
    pub fn eval_condition(&self, expression: &str, scope: Scope<'_>) -> Result<bool, ExecutorError> {
        let value = self.eval_value(expression, scope)?;
        Ok(truthy(&value))
    }

    /// Evaluate an expression string to a value.
    pub fn eval_value(&self, expression: &str, scope: Scope<'_>) -> Result<Value, ExecutorError> {
        let expr = parse_expression(expression)?;
        self.eval(&expr, scope)
    }

    fn eval(&self, expr: &Expression, scope: Scope<'_>) -> Result<Value, ExecutorError> {
        match expr {
            Expression::Path(segments) => scope.resolve(segments),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Comparison { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                compare(&left, op, &right)
            }
            Expression::Logical { left, op, right } => match op {
                LogicalOp::And => {
                    if !truthy(&self.eval(left, scope)?) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(truthy(&self.eval(right, scope)?)))
                }
                LogicalOp::Or => {
                    if truthy(&self.eval(left, scope)?) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(truthy(&self.eval(right, scope)?)))
                }
            },
            Expression::Not(inner) => Ok(Value::Bool(!truthy(&self.eval(inner, scope)?))),
        }
    }
}

/// Truthiness: null/false are false; numbers are true when non-zero; strings
/// when non-empty and not "false"/"0"; arrays and objects when non-empty.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn compare(left: &Value, op: &ComparisonOp, right: &Value) -> Result<Value, ExecutorError> {
    let (left, right) = coerce_for_comparison(left.clone(), right.clone());

    let result = match op {
        ComparisonOp::Equal => left == right,
        ComparisonOp::NotEqual => left != right,
        ComparisonOp::GreaterThan => ordered(&left, &right, |o| o.is_gt())?,
        ComparisonOp::LessThan => ordered(&left, &right, |o| o.is_lt())?,
        ComparisonOp::GreaterThanOrEqual => ordered(&left, &right, |o| o.is_ge())?,
        ComparisonOp::LessThanOrEqual => ordered(&left, &right, |o| o.is_le())?,
    };
    Ok(Value::Bool(result))
}

fn ordered(
    left: &Value,
    right: &Value,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<bool, ExecutorError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            let (l, r) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            Ok(l.partial_cmp(&r).map(&check).unwrap_or(false))
        }
        (Value::String(l), Value::String(r)) => Ok(check(l.cmp(r))),
        _ => Err(ExecutorError::expression(format!(
            "cannot order {left:?} against {right:?}"
        ))),
    }
}

/// Numeric-looking strings compare numerically against numbers.
fn coerce_for_comparison(left: Value, right: Value) -> (Value, Value) {
    match (&left, &right) {
        (Value::String(s), Value::Number(_)) => match s.parse::<f64>() {
            Ok(n) => (number(n), right),
            Err(_) => (left, right),
        },
        (Value::Number(_), Value::String(s)) => match s.parse::<f64>() {
            Ok(n) => (left, number(n)),
            Err(_) => (left, right),
        },
        _ => (left, right),
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_for<'a>(context: &'a Value, results: &'a ResultMap) -> Scope<'a> {
        Scope::new(context, results)
    }

    #[test]
    fn test_simple_boolean() {
        let context = json!({"enabled": true});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();

        assert!(evaluator
            .eval_condition("context.enabled", scope_for(&context, &results))
            .unwrap());
    }

    #[test]
    fn test_comparison_and_coercion() {
        let context = json!({"score": 85, "count": "12"});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();
        let scope = scope_for(&context, &results);

        assert!(evaluator.eval_condition("context.score >= 80", scope).unwrap());
        assert!(!evaluator.eval_condition("context.score < 80", scope).unwrap());
        // numeric string coerces against number
        assert!(evaluator.eval_condition("context.count == 12", scope).unwrap());
    }

    #[test]
    fn test_logical_short_circuit() {
        let context = json!({"a": true, "b": false});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();
        let scope = scope_for(&context, &results);

        assert!(!evaluator.eval_condition("context.a && context.b", scope).unwrap());
        assert!(evaluator.eval_condition("context.a || context.b", scope).unwrap());
        // right side of a short-circuited && is never resolved, so a bad
        // ordering there must not error
        assert!(!evaluator
            .eval_condition("context.b && context.a > 'x'", scope)
            .unwrap());
    }

    #[test]
    fn test_results_lookup() {
        let context = json!({});
        let mut results = ResultMap::new();
        results.insert("node_0".to_string(), json!({"total": 42}));
        let evaluator = ExpressionEvaluator::new();

        assert!(evaluator
            .eval_condition("results.node_0.total == 42", scope_for(&context, &results))
            .unwrap());
    }

    #[test]
    fn test_missing_path_is_null_not_error() {
        let context = json!({});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();
        let scope = scope_for(&context, &results);

        assert!(!evaluator.eval_condition("context.missing.deep", scope).unwrap());
        assert!(evaluator
            .eval_condition("results.node_9 == null", scope)
            .unwrap());
    }

    #[test]
    fn test_unknown_root_rejected() {
        let context = json!({});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();

        let err = evaluator
            .eval_condition("process.env", scope_for(&context, &results))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Expression);
    }

    #[test]
    fn test_eval_value_array_path() {
        let context = json!({"items": [1, 2, 3]});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();
        let scope = scope_for(&context, &results);

        assert_eq!(
            evaluator.eval_value("context.items", scope).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            evaluator.eval_value("context.items.1", scope).unwrap(),
            json!(2)
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!("false")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!([0])));
        assert!(truthy(&json!("yes")));
        assert!(truthy(&json!(-1)));
    }

    #[test]
    fn test_string_comparison() {
        let context = json!({"env": "production"});
        let results = ResultMap::new();
        let evaluator = ExpressionEvaluator::new();

        assert!(evaluator
            .eval_condition("context.env == 'production'", scope_for(&context, &results))
            .unwrap());
    }
}
