// Event records - immutable facts emitted by domain mutations

//! # Event Records
//!
//! Two flavors of event exist in the system:
//!
//! - [`OutboxEvent`]: machine-consumed, drives outbound webhook fan-out
//!   (the outbox pattern for reliable event delivery)
//! - [`ActivityEvent`]: human-readable audit trail entry carrying a
//!   `summary` string
//!
//! Both are created by mutations and never updated. [`ErrorEvent`] and
//! [`MetricsSnapshot`] are the raw input and aggregated output of the
//! hourly metrics rollup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Durable, machine-consumed event used to drive webhook fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Dot-namespaced event type, e.g. `item.stage_changed`
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(
        tenant_id: Uuid,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Human-readable audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Human-readable description of what happened
    pub summary: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(
        tenant_id: Uuid,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        summary: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            summary: summary.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Raw error record consumed (and eventually pruned) by the metrics rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Originating component, e.g. `automation`, `scheduler`, `delivery`
    pub component: String,
    pub code: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(
        tenant_id: Uuid,
        component: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            component: component.into(),
            code: code.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// One aggregated row per component per rollup window, plus a `_system`
/// summary row per window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: Uuid,
    pub component: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub error_count: u64,
    /// Component-specific counters (per-code breakdowns, throughput, ...)
    pub extra: Value,
    pub created_at: DateTime<Utc>,
}
