// Inbound webhook mapper: external events in, engine actions out

//! # Inbound Webhook Mapper
//!
//! One POST endpoint through which external systems drive the engine.
//! The caller authenticates with an opaque API key (either `X-Api-Key` or
//! `Authorization: Bearer`), which resolves the tenant; the body names an
//! external event and carries an arbitrary payload. Every enabled mapping
//! registered for `(tenant, event)` whose conditions pass is applied, with
//! per-mapping failure isolation: a mapping that cannot resolve its target
//! reports a failed result and mutates nothing, and never blocks sibling
//! mappings.
//!
//! An unauthenticated request is rejected before any side effect,
//! including the audit trail entry.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::engine::conditions::conditions_pass;
use crate::engine::template::{interpolate, interpolate_value};
use crate::models::{ActivityEvent, InboundApiKey, InboundMapping, MappingAction, WorkItem};
use crate::{EngineError, Result};

use super::{error_response, ApiState};

/// Per-mapping outcome reported back to the caller.
#[derive(Debug, Serialize)]
pub struct MappingResult {
    pub mapping_id: Uuid,
    pub mapping_name: String,
    pub success: bool,
    pub detail: String,
}

pub async fn inbound_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let key = match authenticate(&state, &headers).await {
        Ok(key) => key,
        Err(err) => return error_response(err),
    };

    let event = match event_name(&body) {
        Some(event) => event,
        None => {
            return error_response(EngineError::InvalidInput(
                "missing event name (expected 'event', 'event_name' or 'event_type')".to_string(),
            ))
        }
    };

    let mappings = match state
        .store
        .list_enabled_mappings(key.tenant_id, &event)
        .await
    {
        Ok(mappings) => mappings,
        Err(err) => return error_response(err),
    };

    let mut results = Vec::new();
    for mapping in &mappings {
        if !conditions_pass(&mapping.conditions, &body) {
            continue;
        }
        let result = match apply_mapping(&state, mapping, &body).await {
            Ok(detail) => MappingResult {
                mapping_id: mapping.id,
                mapping_name: mapping.name.clone(),
                success: true,
                detail,
            },
            Err(err) => {
                warn!(mapping = %mapping.name, error = %err, "inbound mapping failed");
                MappingResult {
                    mapping_id: mapping.id,
                    mapping_name: mapping.name.clone(),
                    success: false,
                    detail: err.to_string(),
                }
            }
        };
        results.push(result);
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    let _ = state
        .store
        .append_activity_event(ActivityEvent::new(
            key.tenant_id,
            "webhook.received",
            "inbound_webhook",
            event.clone(),
            format!(
                "Inbound '{event}' matched {} mapping(s), {succeeded} succeeded",
                results.len()
            ),
            body.clone(),
        ))
        .await;

    (
        StatusCode::OK,
        Json(json!({
            "received": true,
            "event": event,
            "mappings_matched": results.len(),
            "results": results,
        })),
    )
}

/// Resolve the caller's API key, updating its last-used timestamp.
async fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<InboundApiKey> {
    let credential = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .ok_or_else(|| EngineError::Unauthorized("missing API key".to_string()))?;

    let key = state
        .store
        .find_api_key(credential)
        .await?
        .ok_or_else(|| EngineError::Unauthorized("unknown or disabled API key".to_string()))?;
    state.store.touch_api_key(key.id, Utc::now()).await?;
    Ok(key)
}

fn event_name(body: &Value) -> Option<String> {
    ["event", "event_name", "event_type"]
        .iter()
        .find_map(|field| body.get(field))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn apply_mapping(
    state: &ApiState,
    mapping: &InboundMapping,
    body: &Value,
) -> Result<String> {
    match mapping.action {
        MappingAction::TransitionItem => transition_item(state, mapping, body).await,
        MappingAction::UpdateItemField => update_item_field(state, mapping, body).await,
        MappingAction::CreateItem => create_item(state, mapping, body).await,
        MappingAction::EmitEvent => {
            let outcome = state
                .dispatcher
                .execute("emit_event", &mapping.action_config, mapping.tenant_id, body)
                .await;
            if outcome.success {
                Ok(outcome.detail)
            } else {
                Err(EngineError::Internal(outcome.detail))
            }
        }
    }
}

/// Move an item to a new stage. The target is resolved in order from the
/// mapping config: an explicit `stage_id`, a `transition` name among the
/// edges leaving the item's current stage, then a `stage` name. When none
/// resolves the item is left untouched.
async fn transition_item(state: &ApiState, mapping: &InboundMapping, body: &Value) -> Result<String> {
    let config = &mapping.action_config;
    let mut item = load_item(state, mapping.tenant_id, config, body).await?;
    let workflow = state
        .store
        .get_workflow(mapping.tenant_id, item.workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("workflow {}", item.workflow_id)))?;

    let (target, transition) = if let Some(raw) = templated_str(config, "stage_id", body) {
        let id = Uuid::parse_str(&raw)
            .map_err(|_| EngineError::InvalidInput(format!("stage_id '{raw}' is not a uuid")))?;
        let stage = workflow
            .stage(id)
            .ok_or_else(|| EngineError::InvalidInput("Could not resolve target stage".to_string()))?;
        (stage.id, None)
    } else if let Some(name) = templated_str(config, "transition", body) {
        match workflow.transition_by_name(item.stage_id, &name) {
            Some(transition) => (transition.to_stage_id, Some(transition.clone())),
            None => {
                return Err(EngineError::InvalidInput(
                    "Could not resolve target stage".to_string(),
                ))
            }
        }
    } else if let Some(name) = templated_str(config, "stage", body) {
        match workflow.stage_by_name(&name) {
            Some(stage) => (stage.id, None),
            None => {
                return Err(EngineError::InvalidInput(
                    "Could not resolve target stage".to_string(),
                ))
            }
        }
    } else {
        return Err(EngineError::Configuration(
            "mapping config needs one of 'stage_id', 'transition' or 'stage'".to_string(),
        ));
    };

    let from = item.stage_id;
    state
        .stage_engine
        .apply_stage_change(&workflow, &mut item, target, transition.as_ref(), body)
        .await?;
    Ok(format!(
        "item {} moved from {from} to {target}",
        item.id
    ))
}

async fn update_item_field(
    state: &ApiState,
    mapping: &InboundMapping,
    body: &Value,
) -> Result<String> {
    let config = &mapping.action_config;
    let field = config
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Configuration("mapping config needs 'field'".to_string()))?;
    let value_template = config
        .get("value")
        .ok_or_else(|| EngineError::Configuration("mapping config needs 'value'".to_string()))?;

    let mut item = load_item(state, mapping.tenant_id, config, body).await?;
    let value = interpolate_value(value_template, body);
    match item.fields.as_object_mut() {
        Some(fields) => {
            fields.insert(field.to_string(), value);
        }
        None => {
            return Err(EngineError::Internal(format!(
                "item {} has non-object fields",
                item.id
            )))
        }
    }
    item.updated_at = Utc::now();
    let item_id = item.id;
    state.store.update_item(item).await?;
    Ok(format!("set {field} on item {item_id}"))
}

async fn create_item(state: &ApiState, mapping: &InboundMapping, body: &Value) -> Result<String> {
    let config = &mapping.action_config;
    let workflow_id = config
        .get("workflow_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| {
            EngineError::Configuration("mapping config needs a uuid 'workflow_id'".to_string())
        })?;
    let workflow = state
        .store
        .get_workflow(mapping.tenant_id, workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("workflow {workflow_id}")))?;

    let title = templated_str(config, "title", body)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EngineError::Configuration("mapping config needs 'title'".to_string()))?;

    let mut item = WorkItem::new(
        mapping.tenant_id,
        workflow.id,
        workflow.initial_stage_id,
        title,
    );
    if let Some(fields) = config.get("fields") {
        item.fields = interpolate_value(fields, body);
    }
    let item_id = item.id;
    state.store.insert_item(item.clone()).await?;
    state.stage_engine.on_item_created(&workflow, &item).await?;
    Ok(format!("created item {item_id} in {}", workflow.name))
}

async fn load_item(
    state: &ApiState,
    tenant_id: Uuid,
    config: &Value,
    body: &Value,
) -> Result<WorkItem> {
    let raw = templated_str(config, "item_id", body)
        .ok_or_else(|| EngineError::Configuration("mapping config needs 'item_id'".to_string()))?;
    let id = Uuid::parse_str(&raw)
        .map_err(|_| EngineError::InvalidInput(format!("item_id '{raw}' is not a uuid")))?;
    state
        .store
        .get_item(tenant_id, id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("item {id}")))
}

fn templated_str(config: &Value, field: &str, body: &Value) -> Option<String> {
    config
        .get(field)
        .and_then(Value::as_str)
        .map(|template| interpolate(template, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::dispatch::ActionDispatcher;
    use crate::engine::outbox::DeliveryWorker;
    use crate::engine::stage_actions::StageActionEngine;
    use crate::engine::storage::{EngineStore, InMemoryStore};
    use crate::models::rule::{Condition, ConditionOperator};
    use crate::models::{Stage, Transition, WorkflowDefinition};
    use std::sync::Arc;

    fn state() -> (Arc<InMemoryStore>, ApiState) {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let config = EngineConfig::default();
        let dispatcher = Arc::new(ActionDispatcher::new(store.clone(), config.clone()));
        let api = ApiState {
            store: store.clone(),
            dispatcher: dispatcher.clone(),
            stage_engine: Arc::new(StageActionEngine::new(store.clone(), dispatcher)),
            delivery_worker: Arc::new(DeliveryWorker::new(store.clone(), config)),
        };
        (store, api)
    }

    async fn seed_key(store: &Arc<InMemoryStore>, credential: &str) -> Uuid {
        let tenant = Uuid::new_v4();
        store
            .insert_api_key(InboundApiKey {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                key: credential.to_string(),
                name: "test key".to_string(),
                enabled: true,
                last_used_at: None,
            })
            .await
            .unwrap();
        tenant
    }

    async fn seed_workflow(store: &Arc<InMemoryStore>, tenant: Uuid) -> (WorkflowDefinition, WorkItem) {
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
        let workflow = WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            name: "Support".to_string(),
            initial_stage_id: triage.id,
            stages: vec![triage, active],
            transitions: vec![start],
        };
        let item = WorkItem::new(tenant, workflow.id, workflow.initial_stage_id, "Ticket 1");
        store.insert_workflow(workflow.clone()).await.unwrap();
        store.insert_item(item.clone()).await.unwrap();
        (workflow, item)
    }

    fn key_headers(credential: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", credential.parse().unwrap());
        headers
    }

    fn mapping(
        tenant: Uuid,
        event: &str,
        action: MappingAction,
        config: Value,
    ) -> InboundMapping {
        InboundMapping {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            event_name: event.to_string(),
            name: format!("{event} mapping"),
            action,
            action_config: config,
            conditions: vec![],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn unauthenticated_requests_leave_no_trace() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-valid").await;

        let (status, _) = inbound_webhook(
            State(api),
            key_headers("sk-wrong"),
            Json(json!({"event": "deploy.finished"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Rejection happens before any side effect
        assert!(store.list_activity_events(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bearer_tokens_are_accepted_and_key_usage_is_stamped() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-bearer").await;

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-bearer".parse().unwrap());
        let (status, _) =
            inbound_webhook(State(api), headers, Json(json!({"event": "ping"}))).await;
        assert_eq!(status, StatusCode::OK);

        let activity = store.list_activity_events(tenant).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].event_type, "webhook.received");
    }

    #[tokio::test]
    async fn missing_event_name_is_a_bad_request() {
        let (store, api) = state();
        seed_key(&store, "sk-valid").await;

        let (status, _) = inbound_webhook(
            State(api),
            key_headers("sk-valid"),
            Json(json!({"payload": {"x": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transition_mapping_moves_the_item_by_transition_name() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-valid").await;
        let (workflow, item) = seed_workflow(&store, tenant).await;
        store
            .insert_mapping(mapping(
                tenant,
                "ci.passed",
                MappingAction::TransitionItem,
                json!({"item_id": "{{item_id}}", "transition": "start"}),
            ))
            .await
            .unwrap();

        let (status, Json(response)) = inbound_webhook(
            State(api),
            key_headers("sk-valid"),
            Json(json!({"event": "ci.passed", "item_id": item.id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["mappings_matched"], json!(1));
        assert_eq!(response["results"][0]["success"], json!(true));

        let stored = store.get_item(tenant, item.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_id, workflow.stages[1].id);
    }

    #[tokio::test]
    async fn unresolvable_stage_reports_failure_without_mutating() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-valid").await;
        let (_, item) = seed_workflow(&store, tenant).await;
        store
            .insert_mapping(mapping(
                tenant,
                "ci.passed",
                MappingAction::TransitionItem,
                json!({"item_id": "{{item_id}}", "stage": "Archived"}),
            ))
            .await
            .unwrap();

        let (status, Json(response)) = inbound_webhook(
            State(api),
            key_headers("sk-valid"),
            Json(json!({"event": "ci.passed", "item_id": item.id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "mapping failures are not HTTP failures");
        assert_eq!(response["results"][0]["success"], json!(false));
        assert!(response["results"][0]["detail"]
            .as_str()
            .unwrap()
            .contains("Could not resolve target stage"));

        let stored = store.get_item(tenant, item.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_id, item.stage_id, "item is untouched");
    }

    #[tokio::test]
    async fn update_field_mapping_writes_templated_values() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-valid").await;
        let (_, item) = seed_workflow(&store, tenant).await;
        store
            .insert_mapping(mapping(
                tenant,
                "scan.finished",
                MappingAction::UpdateItemField,
                json!({"item_id": "{{item_id}}", "field": "scan_result", "value": "{{result.verdict}}"}),
            ))
            .await
            .unwrap();

        let (status, _) = inbound_webhook(
            State(api),
            key_headers("sk-valid"),
            Json(json!({
                "event": "scan.finished",
                "item_id": item.id,
                "result": {"verdict": "clean"},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let stored = store.get_item(tenant, item.id).await.unwrap().unwrap();
        assert_eq!(stored.fields["scan_result"], json!("clean"));
    }

    #[tokio::test]
    async fn create_item_mapping_runs_on_create_actions() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-valid").await;
        let (workflow, _) = seed_workflow(&store, tenant).await;
        store
            .insert_mapping(mapping(
                tenant,
                "form.submitted",
                MappingAction::CreateItem,
                json!({"workflow_id": workflow.id, "title": "Request from {{name}}"}),
            ))
            .await
            .unwrap();
        store
            .insert_stage_action(crate::models::StageAction {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                workflow_id: workflow.id,
                trigger: crate::models::StageTrigger::OnCreate,
                trigger_ref: None,
                name: "welcome".to_string(),
                action_type: "send_notification".to_string(),
                action_config: json!({"message": "new item arrived"}),
                enabled: true,
            })
            .await
            .unwrap();

        let (status, Json(response)) = inbound_webhook(
            State(api),
            key_headers("sk-valid"),
            Json(json!({"event": "form.submitted", "name": "Ada"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["results"][0]["success"], json!(true));

        let activity = store.list_activity_events(tenant).await.unwrap();
        assert!(activity.iter().any(|e| e.summary == "new item arrived"));
    }

    #[tokio::test]
    async fn conditions_gate_mappings_independently() {
        let (store, api) = state();
        let tenant = seed_key(&store, "sk-valid").await;
        let mut gated = mapping(
            tenant,
            "deploy.finished",
            MappingAction::EmitEvent,
            json!({"event_type": "deploy.prod"}),
        );
        gated.conditions = vec![Condition::new(
            "environment",
            ConditionOperator::Equals,
            json!("production"),
        )];
        store.insert_mapping(gated).await.unwrap();
        store
            .insert_mapping(mapping(
                tenant,
                "deploy.finished",
                MappingAction::EmitEvent,
                json!({"event_type": "deploy.any"}),
            ))
            .await
            .unwrap();

        let (_, Json(response)) = inbound_webhook(
            State(api),
            key_headers("sk-valid"),
            Json(json!({"event": "deploy.finished", "environment": "staging"})),
        )
        .await;
        assert_eq!(response["mappings_matched"], json!(1));

        let events = store.list_outbox_events(tenant).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "deploy.any");
    }
}
