// Condition evaluation - AND-combined clauses over event payloads

//! # Condition Evaluator
//!
//! Evaluates a tenant-authored list of field/operator/value clauses
//! against an event payload. An empty list always passes; otherwise every
//! clause must hold (AND semantics, no OR or grouping).
//!
//! Shape mismatches never error: an operator applied to a value of the
//! wrong shape (say `gt` on a string) simply evaluates to `false`.
//!
//! Unknown operators evaluate to `true`. This fail-open default matches
//! the observed production behavior and is almost certainly a trap for
//! typos in tenant configuration; it is kept for compatibility and logged
//! at `warn` so misconfigured rules are at least visible.

use serde_json::Value;
use tracing::warn;

use crate::models::rule::{Condition, ConditionOperator};

use super::template::resolve_path;

/// `true` when every clause passes against `payload`.
pub fn conditions_pass(conditions: &[Condition], payload: &Value) -> bool {
    conditions.iter().all(|c| clause_passes(c, payload))
}

fn clause_passes(condition: &Condition, payload: &Value) -> bool {
    let resolved = resolve_path(payload, &condition.field);

    match &condition.operator {
        ConditionOperator::Equals => resolved == Some(&condition.value),
        ConditionOperator::NotEquals => resolved != Some(&condition.value),
        ConditionOperator::Contains => match (resolved.and_then(Value::as_str), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        ConditionOperator::In => match (&resolved, condition.value.as_array()) {
            (Some(value), Some(candidates)) => candidates.contains(value),
            _ => false,
        },
        ConditionOperator::Exists => is_defined(resolved),
        ConditionOperator::NotExists => !is_defined(resolved),
        ConditionOperator::Gt => numeric(resolved, &condition.value, |a, b| a > b),
        ConditionOperator::Lt => numeric(resolved, &condition.value, |a, b| a < b),
        ConditionOperator::Gte => numeric(resolved, &condition.value, |a, b| a >= b),
        ConditionOperator::Lte => numeric(resolved, &condition.value, |a, b| a <= b),
        ConditionOperator::Other(op) => {
            warn!(operator = %op, field = %condition.field, "unknown condition operator, evaluating as true");
            true
        }
    }
}

fn is_defined(resolved: Option<&Value>) -> bool {
    matches!(resolved, Some(v) if !v.is_null())
}

fn numeric(resolved: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (resolved.and_then(Value::as_f64), expected.as_f64()) {
        (Some(actual), Some(threshold)) => cmp(actual, threshold),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::ConditionOperator as Op;
    use serde_json::json;

    fn cond(field: &str, op: Op, value: Value) -> Condition {
        Condition::new(field, op, value)
    }

    #[test]
    fn empty_list_always_passes() {
        assert!(conditions_pass(&[], &json!({})));
        assert!(conditions_pass(&[], &json!({"anything": 1})));
    }

    #[test]
    fn and_semantics_one_failure_fails_all() {
        let conditions = vec![
            cond("priority", Op::Equals, json!("high")),
            cond("status", Op::Equals, json!("open")),
        ];
        let payload = json!({"priority": "high", "status": "closed"});
        assert!(!conditions_pass(&conditions, &payload));
    }

    #[test]
    fn equals_is_strict() {
        let conditions = vec![cond("priority", Op::Equals, json!("high"))];
        assert!(!conditions_pass(&conditions, &json!({"priority": "low"})));
        assert!(conditions_pass(&conditions, &json!({"priority": "high"})));
        // Number vs string never equal
        let numeric = vec![cond("n", Op::Equals, json!(5))];
        assert!(!conditions_pass(&numeric, &json!({"n": "5"})));
    }

    #[test]
    fn not_equals_holds_for_missing_field() {
        let conditions = vec![cond("priority", Op::NotEquals, json!("high"))];
        assert!(conditions_pass(&conditions, &json!({})));
        assert!(conditions_pass(&conditions, &json!({"priority": "low"})));
        assert!(!conditions_pass(&conditions, &json!({"priority": "high"})));
    }

    #[test]
    fn contains_requires_strings() {
        let conditions = vec![cond("title", Op::Contains, json!("urgent"))];
        assert!(conditions_pass(&conditions, &json!({"title": "urgent: disk full"})));
        assert!(!conditions_pass(&conditions, &json!({"title": "all good"})));
        // Wrong shape evaluates false, not an error
        assert!(!conditions_pass(&conditions, &json!({"title": 42})));
    }

    #[test]
    fn in_requires_a_list() {
        let conditions = vec![cond("status", Op::In, json!(["open", "pending"]))];
        assert!(conditions_pass(&conditions, &json!({"status": "open"})));
        assert!(!conditions_pass(&conditions, &json!({"status": "closed"})));
        // Clause value that is not a list fails the clause
        let bad = vec![cond("status", Op::In, json!("open"))];
        assert!(!conditions_pass(&bad, &json!({"status": "open"})));
    }

    #[test]
    fn exists_and_not_exists() {
        let exists = vec![cond("assignee", Op::Exists, Value::Null)];
        assert!(conditions_pass(&exists, &json!({"assignee": "ada"})));
        assert!(!conditions_pass(&exists, &json!({})));
        assert!(!conditions_pass(&exists, &json!({"assignee": null})));

        let absent = vec![cond("assignee", Op::NotExists, Value::Null)];
        assert!(conditions_pass(&absent, &json!({})));
        assert!(!conditions_pass(&absent, &json!({"assignee": "ada"})));
    }

    #[test]
    fn numeric_comparisons() {
        let gt = vec![cond("score", Op::Gt, json!(80))];
        assert!(conditions_pass(&gt, &json!({"score": 90})));
        assert!(!conditions_pass(&gt, &json!({"score": 80})));
        // gt on a string is false, not an error
        assert!(!conditions_pass(&gt, &json!({"score": "ninety"})));

        let gte = vec![cond("score", Op::Gte, json!(80))];
        assert!(conditions_pass(&gte, &json!({"score": 80})));

        let lt = vec![cond("score", Op::Lt, json!(10))];
        assert!(conditions_pass(&lt, &json!({"score": 9.5})));
        assert!(!conditions_pass(&lt, &json!({"score": 10})));

        let lte = vec![cond("score", Op::Lte, json!(10))];
        assert!(conditions_pass(&lte, &json!({"score": 10})));
    }

    #[test]
    fn nested_paths_resolve() {
        let conditions = vec![cond("after.stage", Op::Equals, json!("done"))];
        assert!(conditions_pass(&conditions, &json!({"after": {"stage": "done"}})));
        assert!(!conditions_pass(&conditions, &json!({"after": {}})));
    }

    #[test]
    fn unknown_operator_fails_open() {
        let conditions = vec![cond("x", Op::Other("near".to_string()), json!(1))];
        assert!(conditions_pass(&conditions, &json!({})));
    }
}
