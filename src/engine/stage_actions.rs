// Stage-keyed action execution with an explicit phase pipeline

//! # Workflow Stage Action Engine
//!
//! The structurally-keyed sibling of the automation rule evaluator:
//! actions are bound to `(workflow, trigger, stage-or-transition)` instead
//! of a free-form event name, and fire at four fixed points of the item
//! lifecycle.
//!
//! The stage-change pipeline ordering is part of this engine's public
//! contract, not an implementation detail, because downstream actions may
//! read "before" vs "after" state:
//!
//! 1. `on_exit_stage` actions for the old stage (row not yet mutated)
//! 2. `on_transition` actions if a named transition resolved
//! 3. the item row mutation
//! 4. `on_enter_stage` actions for the new stage

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    ActionOutcome, ActivityEvent, ErrorEvent, StageAction, StageTrigger, Transition, WorkItem,
    WorkflowDefinition,
};
use crate::Result;

use super::dispatch::ActionDispatcher;
use super::storage::EngineStore;

pub struct StageActionEngine {
    store: Arc<dyn EngineStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl StageActionEngine {
    pub fn new(store: Arc<dyn EngineStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Run every enabled action bound to `(workflow, trigger, trigger_ref)`.
    /// Failures are isolated per action, mirroring rule evaluation.
    pub async fn run(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        trigger: StageTrigger,
        trigger_ref: Option<Uuid>,
        payload: &Value,
    ) -> Result<Vec<ActionOutcome>> {
        let actions = self
            .store
            .list_stage_actions(tenant_id, workflow_id, trigger, trigger_ref)
            .await?;
        let mut outcomes = Vec::with_capacity(actions.len());

        for action in &actions {
            let outcome = self.run_action(action, payload).await;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run_action(&self, action: &StageAction, payload: &Value) -> ActionOutcome {
        let outcome = self
            .dispatcher
            .execute(
                &action.action_type,
                &action.action_config,
                action.tenant_id,
                payload,
            )
            .await;

        if !outcome.success {
            warn!(
                action = %action.name,
                trigger = ?action.trigger,
                detail = %outcome.detail,
                "stage action failed"
            );
            let _ = self
                .store
                .record_error(ErrorEvent::new(
                    action.tenant_id,
                    "stage_actions",
                    "dispatch_failed",
                    format!("action '{}': {}", action.name, outcome.detail),
                ))
                .await;
        }
        outcome
    }

    /// Run the `on_create` phase for a freshly inserted item.
    pub async fn on_item_created(&self, workflow: &WorkflowDefinition, item: &WorkItem) -> Result<()> {
        let payload = item_payload(item, None, None);
        self.run(
            item.tenant_id,
            workflow.id,
            StageTrigger::OnCreate,
            None,
            &payload,
        )
        .await?;
        Ok(())
    }

    /// Move `item` to `target_stage`, running the full phase pipeline and
    /// persisting the mutation between the transition and enter phases.
    pub async fn apply_stage_change(
        &self,
        workflow: &WorkflowDefinition,
        item: &mut WorkItem,
        target_stage: Uuid,
        transition: Option<&Transition>,
        extra: &Value,
    ) -> Result<()> {
        let from_stage = item.stage_id;
        let payload = stage_change_payload(item, from_stage, target_stage, transition, extra);

        // Phase 1: exit actions see the pre-mutation row
        self.run(
            item.tenant_id,
            workflow.id,
            StageTrigger::OnExitStage,
            Some(from_stage),
            &payload,
        )
        .await?;

        // Phase 2: transition actions, only when a named edge resolved
        if let Some(transition) = transition {
            self.run(
                item.tenant_id,
                workflow.id,
                StageTrigger::OnTransition,
                Some(transition.id),
                &payload,
            )
            .await?;
        }

        // Phase 3: persist the mutation
        item.stage_id = target_stage;
        item.updated_at = Utc::now();
        self.store.update_item(item.clone()).await?;

        // Phase 4: enter actions see the post-mutation row
        self.run(
            item.tenant_id,
            workflow.id,
            StageTrigger::OnEnterStage,
            Some(target_stage),
            &payload,
        )
        .await?;

        self.store
            .append_activity_event(ActivityEvent::new(
                item.tenant_id,
                "item.stage_changed",
                "work_item",
                item.id.to_string(),
                format!(
                    "Item '{}' moved from {} to {}",
                    item.title,
                    stage_name(workflow, from_stage),
                    stage_name(workflow, target_stage)
                ),
                payload,
            ))
            .await?;
        Ok(())
    }
}

fn stage_name(workflow: &WorkflowDefinition, stage_id: Uuid) -> String {
    workflow
        .stage(stage_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| stage_id.to_string())
}

fn item_payload(item: &WorkItem, from: Option<Uuid>, to: Option<Uuid>) -> Value {
    json!({
        "entity_type": "work_item",
        "entity_id": item.id,
        "id": item.id,
        "workflow_id": item.workflow_id,
        "title": item.title,
        "stage_id": item.stage_id,
        "from_stage_id": from,
        "to_stage_id": to,
        "fields": item.fields,
    })
}

fn stage_change_payload(
    item: &WorkItem,
    from: Uuid,
    to: Uuid,
    transition: Option<&Transition>,
    extra: &Value,
) -> Value {
    let mut payload = item_payload(item, Some(from), Some(to));
    if let (Value::Object(map), Some(t)) = (&mut payload, transition) {
        map.insert("transition_id".to_string(), json!(t.id));
        map.insert("transition_name".to_string(), json!(t.name));
    }
    if let (Value::Object(map), Value::Object(extra)) = (&mut payload, extra) {
        for (k, v) in extra {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::storage::InMemoryStore;
    use crate::models::{Stage, StageAction};

    fn stage_action(
        tenant: Uuid,
        workflow: Uuid,
        trigger: StageTrigger,
        trigger_ref: Option<Uuid>,
        message: &str,
    ) -> StageAction {
        StageAction {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            workflow_id: workflow,
            trigger,
            trigger_ref,
            name: message.to_string(),
            action_type: "send_notification".to_string(),
            action_config: json!({"message": message}),
            enabled: true,
        }
    }

    fn sample_workflow(tenant: Uuid) -> WorkflowDefinition {
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
            tenant_id: tenant,
            name: "Support".to_string(),
            initial_stage_id: triage.id,
            stages: vec![triage, active],
            transitions: vec![start],
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, StageActionEngine, WorkflowDefinition, WorkItem) {
        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        let workflow = sample_workflow(tenant);
        let item = WorkItem::new(tenant, workflow.id, workflow.initial_stage_id, "Ticket 1");
        store.insert_workflow(workflow.clone()).await.unwrap();
        store.insert_item(item.clone()).await.unwrap();
        let dispatcher = Arc::new(ActionDispatcher::new(store.clone(), EngineConfig::default()));
        let engine = StageActionEngine::new(store.clone(), dispatcher);
        (store, engine, workflow, item)
    }

    #[tokio::test]
    async fn stage_change_runs_exit_transition_enter_in_order() {
        let (store, engine, workflow, mut item) = setup().await;
        let tenant = item.tenant_id;
        let old_stage = workflow.stages[0].id;
        let new_stage = workflow.stages[1].id;
        let transition = workflow.transitions[0].clone();

        store
            .insert_stage_action(stage_action(
                tenant,
                workflow.id,
                StageTrigger::OnExitStage,
                Some(old_stage),
                "phase:exit",
            ))
            .await
            .unwrap();
        store
            .insert_stage_action(stage_action(
                tenant,
                workflow.id,
                StageTrigger::OnTransition,
                Some(transition.id),
                "phase:transition",
            ))
            .await
            .unwrap();
        store
            .insert_stage_action(stage_action(
                tenant,
                workflow.id,
                StageTrigger::OnEnterStage,
                Some(new_stage),
                "phase:enter",
            ))
            .await
            .unwrap();

        engine
            .apply_stage_change(&workflow, &mut item, new_stage, Some(&transition), &json!({}))
            .await
            .unwrap();

        // The notifications land in activity order: exit, transition, enter
        let activity = store.list_activity_events(tenant).await.unwrap();
        let phases: Vec<&str> = activity
            .iter()
            .filter(|e| e.summary.starts_with("phase:"))
            .map(|e| e.summary.as_str())
            .collect();
        assert_eq!(phases, vec!["phase:exit", "phase:transition", "phase:enter"]);

        // And the row mutated
        let stored = store.get_item(tenant, item.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_id, new_stage);
    }

    #[tokio::test]
    async fn no_transition_phase_without_a_resolved_transition() {
        let (store, engine, workflow, mut item) = setup().await;
        let tenant = item.tenant_id;
        let new_stage = workflow.stages[1].id;
        store
            .insert_stage_action(stage_action(
                tenant,
                workflow.id,
                StageTrigger::OnTransition,
                Some(workflow.transitions[0].id),
                "phase:transition",
            ))
            .await
            .unwrap();

        engine
            .apply_stage_change(&workflow, &mut item, new_stage, None, &json!({}))
            .await
            .unwrap();

        let activity = store.list_activity_events(tenant).await.unwrap();
        assert!(activity.iter().all(|e| !e.summary.contains("transition")));
    }

    #[tokio::test]
    async fn on_create_actions_fire_for_new_items() {
        let (store, engine, workflow, item) = setup().await;
        let tenant = item.tenant_id;
        store
            .insert_stage_action(stage_action(
                tenant,
                workflow.id,
                StageTrigger::OnCreate,
                None,
                "welcome {{title}}",
            ))
            .await
            .unwrap();

        engine.on_item_created(&workflow, &item).await.unwrap();

        let activity = store.list_activity_events(tenant).await.unwrap();
        assert!(activity.iter().any(|e| e.summary == "welcome Ticket 1"));
    }

    #[tokio::test]
    async fn a_failing_action_does_not_stop_the_pipeline() {
        let (store, engine, workflow, mut item) = setup().await;
        let tenant = item.tenant_id;
        let old_stage = workflow.stages[0].id;
        let new_stage = workflow.stages[1].id;

        // Broken exit action (missing message), healthy enter action
        let mut broken = stage_action(
            tenant,
            workflow.id,
            StageTrigger::OnExitStage,
            Some(old_stage),
            "broken",
        );
        broken.action_config = json!({});
        store.insert_stage_action(broken).await.unwrap();
        store
            .insert_stage_action(stage_action(
                tenant,
                workflow.id,
                StageTrigger::OnEnterStage,
                Some(new_stage),
                "phase:enter",
            ))
            .await
            .unwrap();

        engine
            .apply_stage_change(&workflow, &mut item, new_stage, None, &json!({}))
            .await
            .unwrap();

        let stored = store.get_item(tenant, item.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_id, new_stage);
        let activity = store.list_activity_events(tenant).await.unwrap();
        assert!(activity.iter().any(|e| e.summary == "phase:enter"));
    }
}
