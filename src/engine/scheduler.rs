// Periodic sweep that fires due countdown trigger instances

//! # Trigger Sweep
//!
//! Consumes the pending [`ScheduledTriggerInstance`](crate::models::ScheduledTriggerInstance)
//! rows spawned by the automation engine. Each sweep lists instances whose
//! `fire_at` has passed and claims them one at a time through the store's
//! conditional pending -> fired update; an instance another sweep already
//! claimed is skipped silently, which is what keeps firing exactly-once
//! when several sweep loops overlap.
//!
//! Dispatch failures mark the instance failed and record an error event.
//! They never propagate: one broken trigger must not stall the sweep.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{ErrorEvent, ScheduledTriggerInstance};
use crate::Result;

use super::dispatch::ActionDispatcher;
use super::storage::EngineStore;

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub due: usize,
    pub fired: usize,
    pub failed: usize,
    /// Due instances another sweep claimed first
    pub lost_races: usize,
}

pub struct TriggerSweep {
    store: Arc<dyn EngineStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl TriggerSweep {
    pub fn new(store: Arc<dyn EngineStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Fire every instance due at `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let due = self.store.list_due_trigger_instances(now).await?;
        let mut stats = SweepStats {
            due: due.len(),
            ..SweepStats::default()
        };

        for instance in &due {
            // Exactly one sweep wins the claim; losers move on.
            if !self.store.claim_trigger_instance(instance.id).await? {
                stats.lost_races += 1;
                continue;
            }
            match self.fire(instance).await {
                Ok(true) => stats.fired += 1,
                Ok(false) | Err(_) => stats.failed += 1,
            }
        }

        if stats.due > 0 {
            debug!(
                due = stats.due,
                fired = stats.fired,
                failed = stats.failed,
                "trigger sweep complete"
            );
        }
        Ok(stats)
    }

    async fn fire(&self, instance: &ScheduledTriggerInstance) -> Result<bool> {
        let trigger = match self.store.get_scheduled_trigger(instance.trigger_id).await? {
            Some(trigger) => trigger,
            None => {
                // Trigger deleted after the instance was spawned
                warn!(instance = %instance.id, "trigger for due instance is gone");
                self.fail(instance, "trigger definition no longer exists")
                    .await?;
                return Ok(false);
            }
        };

        let outcome = self
            .dispatcher
            .execute(
                &trigger.action_type,
                &trigger.action_config,
                instance.tenant_id,
                &instance.context,
            )
            .await;

        if outcome.success {
            Ok(true)
        } else {
            warn!(
                trigger = %trigger.name,
                instance = %instance.id,
                detail = %outcome.detail,
                "countdown action failed"
            );
            self.fail(instance, &outcome.detail).await?;
            Ok(false)
        }
    }

    async fn fail(&self, instance: &ScheduledTriggerInstance, detail: &str) -> Result<()> {
        self.store
            .mark_trigger_instance_failed(instance.id)
            .await?;
        self.store
            .record_error(ErrorEvent::new(
                instance.tenant_id,
                "scheduler",
                "fire_failed",
                format!("instance {}: {detail}", instance.id),
            ))
            .await
    }
}
