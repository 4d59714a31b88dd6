// Webhook subscriptions, deliveries, inbound keys/mappings, custom actions

//! # Webhook Plumbing
//!
//! Outbound: every enabled [`WebhookSubscription`] gets one
//! [`WebhookDelivery`] row per outbox event in its tenant (fan-out). The
//! delivery worker retries failures with exponential backoff until the
//! attempt ceiling, then dead-letters; manual replay resets a delivery to
//! pending. Delivery is at-least-once by design.
//!
//! Inbound: an [`InboundApiKey`] authenticates an external caller to a
//! tenant; [`InboundMapping`]s translate a named external event into the
//! fixed [`MappingAction`] vocabulary.
//!
//! [`CustomActionType`] is the tenant extension point used by the
//! dispatcher's fallback branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::rule::Condition;

/// Tenant-owned outbound webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub enabled: bool,
}

/// Delivery state machine:
/// `pending -> {success | failed} -> {pending (retry) | dead_letter}`.
/// `dead_letter` is terminal until a manual replay resets it to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    DeadLetter,
}

/// One delivery attempt record per (subscription, outbox event) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_id: Uuid,
    pub status: DeliveryStatus,
    /// Only ever increases
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time the worker may retry; advanced exponentially on failure
    pub next_attempt_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(subscription: &WebhookSubscription, event_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: subscription.tenant_id,
            subscription_id: subscription.id,
            event_id,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            completed_at: None,
            created_at: now,
        }
    }
}

/// Tenant-registered custom action type: dispatch delegates to
/// `handler_url` when a rule's action tag matches `slug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomActionType {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Unique per tenant
    pub slug: String,
    pub name: String,
    pub handler_url: String,
    /// Declarative schema for the action config; informational to the engine
    pub config_schema: Value,
}

/// Opaque bearer credential mapping an external caller to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Fixed vocabulary for inbound webhook mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingAction {
    TransitionItem,
    UpdateItemField,
    CreateItem,
    EmitEvent,
}

/// Tenant-configured translation of a named external event into an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMapping {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// External event name this mapping answers to
    pub event_name: String,
    pub name: String,
    pub action: MappingAction,
    pub action_config: Value,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub enabled: bool,
}
