// Countdown triggers and their pending instances

//! # Scheduled (Countdown) Triggers
//!
//! A [`ScheduledTrigger`] fires its action a fixed number of seconds after
//! a qualifying event instead of immediately. Matching events spawn
//! [`ScheduledTriggerInstance`]s whose `fire_at` is fixed at spawn time;
//! a periodic sweep claims due instances exactly once (conditional
//! pending -> fired update) and runs the action through the dispatcher.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::rule::Condition;

/// Tenant-owned countdown definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTrigger {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Event type that starts the countdown
    pub delay_event: String,
    pub delay_seconds: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub action_type: String,
    pub action_config: Value,
    pub enabled: bool,
}

/// Lifecycle of a spawned instance. `Pending` instances are consumed
/// exactly once by the sweep; the other states are terminal except for
/// manual cancellation of pending instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Fired,
    Failed,
    Canceled,
}

/// One pending firing of a countdown trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTriggerInstance {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub tenant_id: Uuid,
    /// Absolute fire time, computed once at spawn and never recomputed
    pub fire_at: DateTime<Utc>,
    pub status: InstanceStatus,
    /// Payload captured at spawn time, handed to the action when firing
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTriggerInstance {
    /// Spawn an instance for `trigger` with `fire_at = now + delay_seconds`.
    pub fn spawn(trigger: &ScheduledTrigger, context: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id: trigger.id,
            tenant_id: trigger.tenant_id,
            fire_at: now + Duration::seconds(trigger.delay_seconds),
            status: InstanceStatus::Pending,
            context,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spawn_fixes_fire_at_from_spawn_time() {
        let trigger = ScheduledTrigger {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "stale reminder".to_string(),
            delay_event: "ticket.created".to_string(),
            delay_seconds: 300,
            conditions: vec![],
            action_type: "send_notification".to_string(),
            action_config: json!({"message": "still open"}),
            enabled: true,
        };

        let t0 = Utc::now();
        let instance = ScheduledTriggerInstance::spawn(&trigger, json!({"id": 1}), t0);

        assert_eq!(instance.fire_at, t0 + Duration::seconds(300));
        assert_eq!(instance.status, InstanceStatus::Pending);
        assert_eq!(instance.tenant_id, trigger.tenant_id);
    }
}
