// Automation rules - tenant-authored event triggers

//! # Automation Rules
//!
//! An [`AutomationRule`] binds a trigger event type to an action. Rules are
//! tenant-owned, created through configuration UIs, and evaluated read-only
//! by the engine. A rule fires when its `trigger_event` matches the event
//! type exactly and every [`Condition`] passes (AND semantics; there is no
//! OR or grouping).
//!
//! The operator set is intentionally fixed; see
//! [`crate::engine::conditions`] for the evaluation semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tenant-owned automation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Matched exactly against incoming event types
    pub trigger_event: String,
    /// All conditions must pass for the rule to fire
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Action vocabulary tag; see [`crate::models::action::ActionKind`]
    pub action_type: String,
    /// Action-type-specific configuration
    pub action_config: Value,
    /// Disabled rules are never evaluated
    pub enabled: bool,
}

/// A single field/operator/value clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path resolved against the event payload
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

/// The fixed condition operator vocabulary.
///
/// `Other` captures operator strings outside the vocabulary; the evaluator
/// treats them as always-true (fail-open), which mirrors the long-standing
/// production behavior. See `engine::conditions` for the caveat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    In,
    Exists,
    NotExists,
    Gt,
    Lt,
    Gte,
    Lte,
    #[serde(untagged)]
    Other(String),
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}
