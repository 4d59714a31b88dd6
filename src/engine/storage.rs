// Storage abstraction for the automation engine
// Defines the interface the engines persist through, plus the in-memory
// implementation used by tests and single-process deployments.

//! # Storage Abstraction Layer
//!
//! [`EngineStore`] is the repository interface every engine receives as an
//! explicit constructor dependency; nothing in the engine reaches for an
//! ambient store handle. All operations are async and tenant-scoped: there
//! is no API for a cross-tenant write.
//!
//! Two behaviors in this trait carry engine semantics and must hold for
//! every backend:
//!
//! - [`EngineStore::claim_trigger_instance`] is a conditional
//!   pending -> fired update that succeeds for exactly one caller, which
//!   is what prevents double-firing under concurrent sweeps.
//! - [`EngineStore::insert_link`] is insert-or-detect-existing: a
//!   uniqueness hit reports [`LinkInsert::AlreadyExists`] instead of
//!   erroring, making `create_link` idempotent without leaking a backend
//!   error code.
//!
//! [`InMemoryStore`] keeps everything behind a single `tokio::sync::RwLock`,
//! which trivially gives both guarantees.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    ActivityEvent, AutomationRule, CustomActionType, EntityLink, EntityRecord, ErrorEvent,
    InboundApiKey, InboundMapping, InstanceStatus, LinkInsert, MetricsSnapshot, OutboxEvent,
    ScheduledTrigger, ScheduledTriggerInstance, StageAction, StageTrigger, WebhookDelivery,
    WebhookSubscription, WorkItem, WorkflowDefinition,
};
use crate::{EngineError, Result};

/// Repository interface for everything the engines read and write.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // ---- automation rules -------------------------------------------------

    async fn insert_rule(&self, rule: AutomationRule) -> Result<()>;

    /// Enabled rules whose `trigger_event` matches exactly, in insertion order.
    async fn list_enabled_rules(
        &self,
        tenant_id: Uuid,
        trigger_event: &str,
    ) -> Result<Vec<AutomationRule>>;

    // ---- scheduled (countdown) triggers -----------------------------------

    async fn insert_scheduled_trigger(&self, trigger: ScheduledTrigger) -> Result<()>;

    async fn get_scheduled_trigger(&self, id: Uuid) -> Result<Option<ScheduledTrigger>>;

    /// Enabled countdown triggers whose `delay_event` matches exactly.
    async fn list_enabled_countdown_triggers(
        &self,
        tenant_id: Uuid,
        delay_event: &str,
    ) -> Result<Vec<ScheduledTrigger>>;

    async fn insert_trigger_instance(&self, instance: ScheduledTriggerInstance) -> Result<()>;

    async fn get_trigger_instance(&self, id: Uuid) -> Result<Option<ScheduledTriggerInstance>>;

    /// Instances with `status = pending` and `fire_at <= now`.
    async fn list_due_trigger_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTriggerInstance>>;

    /// Conditional pending -> fired transition. Returns `true` for exactly
    /// one caller per instance; concurrent sweeps lose the race and get
    /// `false`.
    async fn claim_trigger_instance(&self, id: Uuid) -> Result<bool>;

    async fn mark_trigger_instance_failed(&self, id: Uuid) -> Result<()>;

    /// Instances whose `fire_at` falls in `[start, end)`, for rollups.
    async fn list_trigger_instances_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTriggerInstance>>;

    // ---- events -----------------------------------------------------------

    async fn append_outbox_event(&self, event: OutboxEvent) -> Result<()>;

    async fn get_outbox_event(&self, id: Uuid) -> Result<Option<OutboxEvent>>;

    async fn list_outbox_events(&self, tenant_id: Uuid) -> Result<Vec<OutboxEvent>>;

    async fn append_activity_event(&self, event: ActivityEvent) -> Result<()>;

    async fn list_activity_events(&self, tenant_id: Uuid) -> Result<Vec<ActivityEvent>>;

    // ---- entities ---------------------------------------------------------

    async fn insert_entity(&self, entity: EntityRecord) -> Result<()>;

    async fn get_entity(
        &self,
        tenant_id: Uuid,
        table: &str,
        entity_id: &str,
    ) -> Result<Option<EntityRecord>>;

    /// Write a single column on an existing row, scoped by tenant.
    async fn update_entity_field(
        &self,
        tenant_id: Uuid,
        table: &str,
        entity_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()>;

    /// Merge `value` into the row's metadata object under `key`.
    async fn merge_entity_metadata(
        &self,
        tenant_id: Uuid,
        table: &str,
        entity_id: &str,
        key: &str,
        value: Value,
    ) -> Result<()>;

    /// Insert-or-detect-existing on the link uniqueness key.
    async fn insert_link(&self, link: EntityLink) -> Result<LinkInsert>;

    // ---- custom action types ----------------------------------------------

    async fn insert_custom_action(&self, action: CustomActionType) -> Result<()>;

    async fn find_custom_action(
        &self,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<CustomActionType>>;

    // ---- inbound webhook keys and mappings --------------------------------

    async fn insert_api_key(&self, key: InboundApiKey) -> Result<()>;

    /// Look up an enabled key by its opaque credential.
    async fn find_api_key(&self, key: &str) -> Result<Option<InboundApiKey>>;

    async fn touch_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    async fn insert_mapping(&self, mapping: InboundMapping) -> Result<()>;

    /// Enabled mappings for `(tenant, event_name)`, in insertion order.
    async fn list_enabled_mappings(
        &self,
        tenant_id: Uuid,
        event_name: &str,
    ) -> Result<Vec<InboundMapping>>;

    // ---- workflows, items, stage actions ----------------------------------

    async fn insert_workflow(&self, workflow: WorkflowDefinition) -> Result<()>;

    async fn get_workflow(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<WorkflowDefinition>>;

    async fn insert_item(&self, item: WorkItem) -> Result<()>;

    async fn get_item(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<WorkItem>>;

    async fn update_item(&self, item: WorkItem) -> Result<()>;

    async fn insert_stage_action(&self, action: StageAction) -> Result<()>;

    /// Enabled stage actions for a `(workflow, trigger, ref)` key.
    async fn list_stage_actions(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        trigger: StageTrigger,
        trigger_ref: Option<Uuid>,
    ) -> Result<Vec<StageAction>>;

    // ---- webhook subscriptions and deliveries -----------------------------

    async fn insert_subscription(&self, subscription: WebhookSubscription) -> Result<()>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>>;

    async fn list_enabled_subscriptions(&self, tenant_id: Uuid)
        -> Result<Vec<WebhookSubscription>>;

    async fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<()>;

    async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>>;

    /// Pending deliveries whose `next_attempt_at <= now`.
    async fn list_due_deliveries(&self, now: DateTime<Utc>) -> Result<Vec<WebhookDelivery>>;

    async fn update_delivery(&self, delivery: WebhookDelivery) -> Result<()>;

    /// Deliveries completed in `[start, end)`, for rollups.
    async fn list_deliveries_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>>;

    // ---- error events and metrics snapshots -------------------------------

    async fn record_error(&self, error: ErrorEvent) -> Result<()>;

    async fn list_errors_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ErrorEvent>>;

    /// Delete raw error events older than `cutoff`; returns how many.
    async fn prune_errors_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn insert_snapshot(&self, snapshot: MetricsSnapshot) -> Result<()>;

    async fn list_snapshots(&self) -> Result<Vec<MetricsSnapshot>>;
}

/// In-memory implementation for development, testing and single-process
/// deployments. Not persistent, not distributed; relational backends live
/// behind the same trait.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    rules: Vec<AutomationRule>,
    scheduled_triggers: Vec<ScheduledTrigger>,
    trigger_instances: Vec<ScheduledTriggerInstance>,
    outbox_events: Vec<OutboxEvent>,
    activity_events: Vec<ActivityEvent>,
    entities: Vec<EntityRecord>,
    links: Vec<EntityLink>,
    custom_actions: Vec<CustomActionType>,
    api_keys: Vec<InboundApiKey>,
    mappings: Vec<InboundMapping>,
    workflows: HashMap<Uuid, WorkflowDefinition>,
    items: HashMap<Uuid, WorkItem>,
    stage_actions: Vec<StageAction>,
    subscriptions: Vec<WebhookSubscription>,
    deliveries: Vec<WebhookDelivery>,
    errors: Vec<ErrorEvent>,
    snapshots: Vec<MetricsSnapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineStore for InMemoryStore {
    async fn insert_rule(&self, rule: AutomationRule) -> Result<()> {
        self.state.write().await.rules.push(rule);
        Ok(())
    }

    async fn list_enabled_rules(
        &self,
        tenant_id: Uuid,
        trigger_event: &str,
    ) -> Result<Vec<AutomationRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.enabled && r.trigger_event == trigger_event)
            .cloned()
            .collect())
    }

    async fn insert_scheduled_trigger(&self, trigger: ScheduledTrigger) -> Result<()> {
        self.state.write().await.scheduled_triggers.push(trigger);
        Ok(())
    }

    async fn get_scheduled_trigger(&self, id: Uuid) -> Result<Option<ScheduledTrigger>> {
        let state = self.state.read().await;
        Ok(state.scheduled_triggers.iter().find(|t| t.id == id).cloned())
    }

    async fn list_enabled_countdown_triggers(
        &self,
        tenant_id: Uuid,
        delay_event: &str,
    ) -> Result<Vec<ScheduledTrigger>> {
        let state = self.state.read().await;
        Ok(state
            .scheduled_triggers
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.enabled && t.delay_event == delay_event)
            .cloned()
            .collect())
    }

    async fn insert_trigger_instance(&self, instance: ScheduledTriggerInstance) -> Result<()> {
        self.state.write().await.trigger_instances.push(instance);
        Ok(())
    }

    async fn get_trigger_instance(&self, id: Uuid) -> Result<Option<ScheduledTriggerInstance>> {
        let state = self.state.read().await;
        Ok(state.trigger_instances.iter().find(|i| i.id == id).cloned())
    }

    async fn list_due_trigger_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTriggerInstance>> {
        let state = self.state.read().await;
        Ok(state
            .trigger_instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Pending && i.fire_at <= now)
            .cloned()
            .collect())
    }

    async fn claim_trigger_instance(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .trigger_instances
            .iter_mut()
            .find(|i| i.id == id && i.status == InstanceStatus::Pending)
        {
            Some(instance) => {
                instance.status = InstanceStatus::Fired;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_trigger_instance_failed(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(instance) = state.trigger_instances.iter_mut().find(|i| i.id == id) {
            instance.status = InstanceStatus::Failed;
        }
        Ok(())
    }

    async fn list_trigger_instances_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTriggerInstance>> {
        let state = self.state.read().await;
        Ok(state
            .trigger_instances
            .iter()
            .filter(|i| i.fire_at >= start && i.fire_at < end)
            .cloned()
            .collect())
    }

    async fn append_outbox_event(&self, event: OutboxEvent) -> Result<()> {
        self.state.write().await.outbox_events.push(event);
        Ok(())
    }

    async fn get_outbox_event(&self, id: Uuid) -> Result<Option<OutboxEvent>> {
        let state = self.state.read().await;
        Ok(state.outbox_events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_outbox_events(&self, tenant_id: Uuid) -> Result<Vec<OutboxEvent>> {
        let state = self.state.read().await;
        Ok(state
            .outbox_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn append_activity_event(&self, event: ActivityEvent) -> Result<()> {
        self.state.write().await.activity_events.push(event);
        Ok(())
    }

    async fn list_activity_events(&self, tenant_id: Uuid) -> Result<Vec<ActivityEvent>> {
        let state = self.state.read().await;
        Ok(state
            .activity_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn insert_entity(&self, entity: EntityRecord) -> Result<()> {
        self.state.write().await.entities.push(entity);
        Ok(())
    }

    async fn get_entity(
        &self,
        tenant_id: Uuid,
        table: &str,
        entity_id: &str,
    ) -> Result<Option<EntityRecord>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.table == table && e.id.to_string() == entity_id)
            .cloned())
    }

    async fn update_entity_field(
        &self,
        tenant_id: Uuid,
        table: &str,
        entity_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.table == table && e.id.to_string() == entity_id)
            .ok_or_else(|| EngineError::NotFound(format!("{table} row {entity_id}")))?;
        match entity.fields.as_object_mut() {
            Some(fields) => {
                fields.insert(field.to_string(), value);
                Ok(())
            }
            None => Err(EngineError::Internal(format!(
                "{table} row {entity_id} has non-object fields"
            ))),
        }
    }

    async fn merge_entity_metadata(
        &self,
        tenant_id: Uuid,
        table: &str,
        entity_id: &str,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.table == table && e.id.to_string() == entity_id)
            .ok_or_else(|| EngineError::NotFound(format!("{table} row {entity_id}")))?;
        if !entity.metadata.is_object() {
            entity.metadata = Value::Object(Default::default());
        }
        if let Some(metadata) = entity.metadata.as_object_mut() {
            metadata.insert(key.to_string(), value);
        }
        Ok(())
    }

    async fn insert_link(&self, link: EntityLink) -> Result<LinkInsert> {
        let mut state = self.state.write().await;
        if state.links.iter().any(|l| l.unique_key() == link.unique_key()) {
            return Ok(LinkInsert::AlreadyExists);
        }
        state.links.push(link);
        Ok(LinkInsert::Inserted)
    }

    async fn insert_custom_action(&self, action: CustomActionType) -> Result<()> {
        self.state.write().await.custom_actions.push(action);
        Ok(())
    }

    async fn find_custom_action(
        &self,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<CustomActionType>> {
        let state = self.state.read().await;
        Ok(state
            .custom_actions
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.slug == slug)
            .cloned())
    }

    async fn insert_api_key(&self, key: InboundApiKey) -> Result<()> {
        self.state.write().await.api_keys.push(key);
        Ok(())
    }

    async fn find_api_key(&self, key: &str) -> Result<Option<InboundApiKey>> {
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .iter()
            .find(|k| k.enabled && k.key == key)
            .cloned())
    }

    async fn touch_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(key) = state.api_keys.iter_mut().find(|k| k.id == id) {
            key.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn insert_mapping(&self, mapping: InboundMapping) -> Result<()> {
        self.state.write().await.mappings.push(mapping);
        Ok(())
    }

    async fn list_enabled_mappings(
        &self,
        tenant_id: Uuid,
        event_name: &str,
    ) -> Result<Vec<InboundMapping>> {
        let state = self.state.read().await;
        Ok(state
            .mappings
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.enabled && m.event_name == event_name)
            .cloned()
            .collect())
    }

    async fn insert_workflow(&self, workflow: WorkflowDefinition) -> Result<()> {
        self.state.write().await.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get_workflow(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<WorkflowDefinition>> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .get(&id)
            .filter(|w| w.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert_item(&self, item: WorkItem) -> Result<()> {
        self.state.write().await.items.insert(item.id, item);
        Ok(())
    }

    async fn get_item(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<WorkItem>> {
        let state = self.state.read().await;
        Ok(state
            .items
            .get(&id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_item(&self, item: WorkItem) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.items.contains_key(&item.id) {
            return Err(EngineError::NotFound(format!("item {}", item.id)));
        }
        state.items.insert(item.id, item);
        Ok(())
    }

    async fn insert_stage_action(&self, action: StageAction) -> Result<()> {
        self.state.write().await.stage_actions.push(action);
        Ok(())
    }

    async fn list_stage_actions(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        trigger: StageTrigger,
        trigger_ref: Option<Uuid>,
    ) -> Result<Vec<StageAction>> {
        let state = self.state.read().await;
        Ok(state
            .stage_actions
            .iter()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.enabled
                    && a.workflow_id == workflow_id
                    && a.trigger == trigger
                    && a.trigger_ref == trigger_ref
            })
            .cloned()
            .collect())
    }

    async fn insert_subscription(&self, subscription: WebhookSubscription) -> Result<()> {
        self.state.write().await.subscriptions.push(subscription);
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<WebhookSubscription>> {
        let state = self.state.read().await;
        Ok(state.subscriptions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_enabled_subscriptions(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<WebhookSubscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.enabled)
            .cloned()
            .collect())
    }

    async fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        self.state.write().await.deliveries.push(delivery);
        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        let state = self.state.read().await;
        Ok(state.deliveries.iter().find(|d| d.id == id).cloned())
    }

    async fn list_due_deliveries(&self, now: DateTime<Utc>) -> Result<Vec<WebhookDelivery>> {
        let state = self.state.read().await;
        Ok(state
            .deliveries
            .iter()
            .filter(|d| {
                d.status == crate::models::DeliveryStatus::Pending && d.next_attempt_at <= now
            })
            .cloned()
            .collect())
    }

    async fn update_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        let mut state = self.state.write().await;
        match state.deliveries.iter_mut().find(|d| d.id == delivery.id) {
            Some(existing) => {
                *existing = delivery;
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("delivery {}", delivery.id))),
        }
    }

    async fn list_deliveries_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>> {
        let state = self.state.read().await;
        Ok(state
            .deliveries
            .iter()
            .filter(|d| matches!(d.completed_at, Some(t) if t >= start && t < end))
            .cloned()
            .collect())
    }

    async fn record_error(&self, error: ErrorEvent) -> Result<()> {
        self.state.write().await.errors.push(error);
        Ok(())
    }

    async fn list_errors_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ErrorEvent>> {
        let state = self.state.read().await;
        Ok(state
            .errors
            .iter()
            .filter(|e| e.created_at >= start && e.created_at < end)
            .cloned()
            .collect())
    }

    async fn prune_errors_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.errors.len();
        state.errors.retain(|e| e.created_at >= cutoff);
        Ok((before - state.errors.len()) as u64)
    }

    async fn insert_snapshot(&self, snapshot: MetricsSnapshot) -> Result<()> {
        self.state.write().await.snapshots.push(snapshot);
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<MetricsSnapshot>> {
        let state = self.state.read().await;
        Ok(state.snapshots.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduledTrigger;
    use serde_json::json;

    fn sample_trigger(tenant_id: Uuid) -> ScheduledTrigger {
        ScheduledTrigger {
            id: Uuid::new_v4(),
            tenant_id,
            name: "reminder".to_string(),
            delay_event: "ticket.created".to_string(),
            delay_seconds: 60,
            conditions: vec![],
            action_type: "send_notification".to_string(),
            action_config: json!({"message": "ping"}),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn claim_trigger_instance_is_single_shot() {
        let store = InMemoryStore::new();
        let tenant = Uuid::new_v4();
        let trigger = sample_trigger(tenant);
        let instance = ScheduledTriggerInstance::spawn(&trigger, json!({}), Utc::now());
        let id = instance.id;
        store.insert_trigger_instance(instance).await.unwrap();

        assert!(store.claim_trigger_instance(id).await.unwrap());
        // Second claim loses the race
        assert!(!store.claim_trigger_instance(id).await.unwrap());

        let stored = store.get_trigger_instance(id).await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Fired);
    }

    #[tokio::test]
    async fn insert_link_detects_duplicates() {
        let store = InMemoryStore::new();
        let tenant = Uuid::new_v4();
        let link = EntityLink {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            source_type: "ticket".to_string(),
            source_id: "t1".to_string(),
            target_type: "account".to_string(),
            target_id: "a1".to_string(),
            link_type: "belongs_to".to_string(),
            created_at: Utc::now(),
        };
        let duplicate = EntityLink {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            ..link.clone()
        };

        assert_eq!(store.insert_link(link).await.unwrap(), LinkInsert::Inserted);
        assert_eq!(
            store.insert_link(duplicate).await.unwrap(),
            LinkInsert::AlreadyExists
        );
    }

    #[tokio::test]
    async fn disabled_api_keys_are_invisible() {
        let store = InMemoryStore::new();
        let key = InboundApiKey {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            key: "sk-disabled".to_string(),
            name: "old key".to_string(),
            enabled: false,
            last_used_at: None,
        };
        store.insert_api_key(key).await.unwrap();
        assert!(store.find_api_key("sk-disabled").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rule_listing_filters_disabled_and_other_events() {
        let store = InMemoryStore::new();
        let tenant = Uuid::new_v4();
        for (event, enabled) in [
            ("ticket.created", true),
            ("ticket.created", false),
            ("ticket.closed", true),
        ] {
            store
                .insert_rule(AutomationRule {
                    id: Uuid::new_v4(),
                    tenant_id: tenant,
                    name: event.to_string(),
                    trigger_event: event.to_string(),
                    conditions: vec![],
                    action_type: "send_notification".to_string(),
                    action_config: json!({}),
                    enabled,
                })
                .await
                .unwrap();
        }

        let rules = store
            .list_enabled_rules(tenant, "ticket.created")
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);

        // Other tenants see nothing
        let other = store
            .list_enabled_rules(Uuid::new_v4(), "ticket.created")
            .await
            .unwrap();
        assert!(other.is_empty());
    }
}
