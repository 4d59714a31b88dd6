// Workflow definitions, items and stage-keyed actions

//! # Workflows
//!
//! Tenant-defined state machines: [`Stage`]s are the nodes, [`Transition`]s
//! the named edges, and [`WorkItem`]s the records moving through them.
//!
//! [`StageAction`]s are the structurally-keyed counterpart of automation
//! rules: instead of matching a free-form event name they are tied to a
//! `(workflow, trigger, stage-or-transition)` triple and fired at fixed
//! points in the item lifecycle (see [`StageTrigger`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tenant-defined workflow state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub stages: Vec<Stage>,
    pub transitions: Vec<Transition>,
    /// Stage assigned to newly created items unless overridden
    pub initial_stage_id: Uuid,
}

/// A node in the workflow state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: Uuid,
    pub name: String,
}

/// A named, directed edge between two stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    pub name: String,
    pub from_stage_id: Uuid,
    pub to_stage_id: Uuid,
}

/// A record moving through a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub stage_id: Uuid,
    pub title: String,
    /// Tenant-defined fields, written by `update_item_field` mappings
    pub fields: Value,
    /// Engine-written metadata (e.g. merged AI output)
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The four points in the item lifecycle where stage actions fire.
///
/// On a stage change the ordering is load-bearing and fixed:
/// `OnExitStage` (old stage) fires before the row is mutated,
/// `OnTransition` fires if a named transition resolved, the row is
/// mutated, then `OnEnterStage` (new stage) fires. Downstream actions may
/// depend on observing "before" vs "after" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTrigger {
    OnCreate,
    OnEnterStage,
    OnExitStage,
    OnTransition,
}

/// An action keyed by `(workflow, trigger, stage-or-transition)` rather
/// than by event name. Same action vocabulary as automation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub trigger: StageTrigger,
    /// Stage id or transition id the trigger refers to; `None` for `OnCreate`
    pub trigger_ref: Option<Uuid>,
    pub name: String,
    pub action_type: String,
    pub action_config: Value,
    pub enabled: bool,
}

impl WorkflowDefinition {
    pub fn stage(&self, id: Uuid) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn transition(&self, id: Uuid) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// Resolve a transition by name among the edges leaving `from_stage`.
    /// Name matching is case-insensitive; edges from other stages never
    /// match even when the name does.
    pub fn transition_by_name(&self, from_stage: Uuid, name: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from_stage_id == from_stage && t.name.eq_ignore_ascii_case(name))
    }
}

impl WorkItem {
    pub fn new(tenant_id: Uuid, workflow_id: Uuid, stage_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_id,
            stage_id,
            title: title.into(),
            fields: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workflow() -> WorkflowDefinition {
        let triage = Stage {
            id: Uuid::new_v4(),
            name: "Triage".to_string(),
        };
        let active = Stage {
            id: Uuid::new_v4(),
            name: "Active".to_string(),
        };
        let start = Transition {
            id: Uuid::new_v4(),
            name: "Start".to_string(),
            from_stage_id: triage.id,
            to_stage_id: active.id,
        };
        WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Support".to_string(),
            initial_stage_id: triage.id,
            stages: vec![triage, active],
            transitions: vec![start],
        }
    }

    #[test]
    fn transition_by_name_is_case_insensitive_and_stage_scoped() {
        let workflow = sample_workflow();
        let triage = workflow.stages[0].id;
        let active = workflow.stages[1].id;

        assert!(workflow.transition_by_name(triage, "start").is_some());
        assert!(workflow.transition_by_name(triage, "START").is_some());
        // Same name, wrong source stage
        assert!(workflow.transition_by_name(active, "start").is_none());
    }

    #[test]
    fn stage_by_name_ignores_case() {
        let workflow = sample_workflow();
        assert!(workflow.stage_by_name("triage").is_some());
        assert!(workflow.stage_by_name("missing").is_none());
    }
}
