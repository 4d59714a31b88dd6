// Hourly aggregation of error events into metrics snapshots

//! # Metrics Rollup
//!
//! Aggregates the raw [`ErrorEvent`](crate::models::ErrorEvent) stream and
//! the period's operational rows into one
//! [`MetricsSnapshot`](crate::models::MetricsSnapshot) per component, plus
//! a `_system` summary row, for the most recent complete clock hour. After
//! snapshotting, raw error events older than the retention window are
//! pruned; snapshots are what survives long-term.
//!
//! The rollup is deliberately lossy about detail and conservative about
//! failure: any error during aggregation is recorded as an error event for
//! the next window rather than propagated.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{ErrorEvent, InstanceStatus, MetricsSnapshot};
use crate::{EngineError, Result};

use super::storage::EngineStore;

/// Tenant id used for error events the system emits about itself, outside
/// any real tenant.
const SYSTEM_TENANT: uuid::Uuid = uuid::Uuid::nil();

/// Counters for one rollup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollupStats {
    pub snapshots_written: usize,
    pub errors_pruned: u64,
}

pub struct MetricsRollup {
    store: Arc<dyn EngineStore>,
    retention: Duration,
}

impl MetricsRollup {
    pub fn new(store: Arc<dyn EngineStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention: Duration::days(retention_days),
        }
    }

    /// Roll up the most recent complete clock hour before `now`, then
    /// prune raw errors past retention. Aggregation failures are recorded,
    /// not propagated.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RollupStats> {
        let window_end = now
            .duration_trunc(Duration::hours(1))
            .map_err(|e| EngineError::Internal(format!("window truncation: {e}")))?;
        let window_start = window_end - Duration::hours(1);

        let mut stats = RollupStats::default();
        match self.aggregate(window_start, window_end).await {
            Ok(written) => stats.snapshots_written = written,
            Err(err) => {
                warn!(error = %err, "metrics rollup failed");
                self.store
                    .record_error(ErrorEvent::new(
                        SYSTEM_TENANT,
                        "rollup",
                        "aggregation_failed",
                        err.to_string(),
                    ))
                    .await?;
            }
        }

        stats.errors_pruned = self.store.prune_errors_before(now - self.retention).await?;
        debug!(
            snapshots = stats.snapshots_written,
            pruned = stats.errors_pruned,
            "metrics rollup complete"
        );
        Ok(stats)
    }

    async fn aggregate(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<usize> {
        let errors = self.store.list_errors_between(start, end).await?;

        // component -> (total, code -> count)
        let mut by_component: BTreeMap<String, (u64, BTreeMap<String, u64>)> = BTreeMap::new();
        for error in &errors {
            let entry = by_component.entry(error.component.clone()).or_default();
            entry.0 += 1;
            *entry.1.entry(error.code.clone()).or_default() += 1;
        }

        let instances = self.store.list_trigger_instances_between(start, end).await?;
        let fired = instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Fired)
            .count() as u64;
        let failed = instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Failed)
            .count() as u64;

        let delivered = self
            .store
            .list_deliveries_completed_between(start, end)
            .await?
            .len() as u64;

        // The scheduler and delivery components get a row whenever they did
        // work, error events or not.
        if fired > 0 || failed > 0 {
            by_component.entry("scheduler".to_string()).or_default();
        }
        if delivered > 0 {
            by_component.entry("delivery".to_string()).or_default();
        }

        let mut written = 0;
        let mut total_errors = 0u64;
        for (component, (count, codes)) in &by_component {
            total_errors += count;

            // Throughput counters ride on the component's own row so a
            // window with errors never loses them.
            let mut extra = serde_json::Map::new();
            if !codes.is_empty() {
                extra.insert("by_code".to_string(), json!(codes));
            }
            match component.as_str() {
                "scheduler" => {
                    extra.insert("fired".to_string(), json!(fired));
                    extra.insert("failed".to_string(), json!(failed));
                }
                "delivery" => {
                    extra.insert("delivered".to_string(), json!(delivered));
                }
                _ => {}
            }

            self.store
                .insert_snapshot(snapshot(component, start, end, *count, Value::Object(extra)))
                .await?;
            written += 1;
        }

        self.store
            .insert_snapshot(snapshot(
                "_system",
                start,
                end,
                total_errors,
                json!({
                    "components": by_component.len(),
                    "triggers_fired": fired,
                    "triggers_failed": failed,
                    "webhooks_delivered": delivered,
                }),
            ))
            .await?;
        Ok(written + 1)
    }
}

fn snapshot(
    component: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    error_count: u64,
    extra: serde_json::Value,
) -> MetricsSnapshot {
    MetricsSnapshot {
        id: uuid::Uuid::new_v4(),
        component: component.to_string(),
        window_start: start,
        window_end: end,
        error_count,
        extra,
        created_at: Utc::now(),
    }
}
