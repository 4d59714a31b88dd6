// Automation rule evaluation - event in, actions out

//! # Automation Rule Evaluator
//!
//! For a `(tenant, event_type, payload)` triple: load the enabled rules
//! whose `trigger_event` matches, filter each through the condition
//! evaluator, dispatch the action for each match, and record an audit
//! trail entry per dispatched rule.
//!
//! Isolation is per-rule, not per-batch: one rule failing (condition
//! crash, dispatch failure, storage error) is caught, logged and recorded,
//! and never aborts evaluation of sibling rules.
//!
//! After ordinary rules, enabled countdown triggers whose `delay_event`
//! matches the same event are evaluated; matches spawn a pending
//! [`ScheduledTriggerInstance`](crate::models::ScheduledTriggerInstance)
//! with `fire_at = now + delay_seconds` for the sweep to consume later.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ActivityEvent, AutomationRule, ErrorEvent, ScheduledTriggerInstance};
use crate::Result;

use super::conditions::conditions_pass;
use super::dispatch::ActionDispatcher;
use super::storage::EngineStore;

/// Counters describing one evaluation pass; the audit trail carries the
/// per-rule detail.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub rules_matched: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub countdowns_spawned: usize,
}

pub struct AutomationEngine {
    store: Arc<dyn EngineStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl AutomationEngine {
    pub fn new(store: Arc<dyn EngineStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Evaluate all rules and countdown triggers for one event.
    pub async fn handle_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        payload: &Value,
    ) -> Result<EvaluationSummary> {
        self.handle_event_at(tenant_id, event_type, payload, Utc::now())
            .await
    }

    /// Same as [`handle_event`](Self::handle_event) with an explicit clock,
    /// so countdown spawn times are deterministic under test.
    pub async fn handle_event_at(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<EvaluationSummary> {
        let rules = self.store.list_enabled_rules(tenant_id, event_type).await?;
        let mut summary = EvaluationSummary::default();

        for rule in &rules {
            if !conditions_pass(&rule.conditions, payload) {
                continue;
            }
            summary.rules_matched += 1;

            // One rule's failure never aborts its siblings.
            match self.dispatch_rule(rule, payload).await {
                Ok(true) => summary.dispatched += 1,
                Ok(false) => summary.failed += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(rule = %rule.name, error = %err, "automation rule errored");
                    let _ = self
                        .store
                        .record_error(ErrorEvent::new(
                            tenant_id,
                            "automation",
                            "rule_error",
                            format!("rule '{}': {err}", rule.name),
                        ))
                        .await;
                }
            }
        }

        summary.countdowns_spawned = self
            .spawn_countdowns(tenant_id, event_type, payload, now)
            .await?;

        info!(
            %tenant_id,
            event_type,
            matched = summary.rules_matched,
            dispatched = summary.dispatched,
            "automation evaluation complete"
        );
        Ok(summary)
    }

    async fn dispatch_rule(&self, rule: &AutomationRule, payload: &Value) -> Result<bool> {
        let outcome = self
            .dispatcher
            .execute(&rule.action_type, &rule.action_config, rule.tenant_id, payload)
            .await;

        let summary = if outcome.success {
            format!("Automation '{}' ran: {}", rule.name, outcome.detail)
        } else {
            format!("Automation '{}' failed: {}", rule.name, outcome.detail)
        };
        self.store
            .append_activity_event(ActivityEvent::new(
                rule.tenant_id,
                "automation.rule_fired",
                "automation_rule",
                rule.id.to_string(),
                summary,
                payload.clone(),
            ))
            .await?;

        if !outcome.success {
            self.store
                .record_error(ErrorEvent::new(
                    rule.tenant_id,
                    "automation",
                    "dispatch_failed",
                    format!("rule '{}': {}", rule.name, outcome.detail),
                ))
                .await?;
        }
        Ok(outcome.success)
    }

    async fn spawn_countdowns(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let triggers = self
            .store
            .list_enabled_countdown_triggers(tenant_id, event_type)
            .await?;
        let mut spawned = 0;

        for trigger in &triggers {
            if !conditions_pass(&trigger.conditions, payload) {
                continue;
            }
            let instance = ScheduledTriggerInstance::spawn(trigger, payload.clone(), now);
            self.store.insert_trigger_instance(instance).await?;
            spawned += 1;
        }
        Ok(spawned)
    }
}
