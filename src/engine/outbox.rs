// Outbox fan-out and the webhook delivery worker

//! # Outbox & Webhook Delivery
//!
//! Publishing an event appends it to the outbox and fans it out into one
//! pending [`WebhookDelivery`](crate::models::WebhookDelivery) per enabled
//! subscription in the tenant; the append and the fan-out happen in the
//! same publish call so a stored event always has its delivery rows.
//!
//! [`DeliveryWorker::run_once`] drains due deliveries: a 2xx response
//! completes the row, anything else bumps the attempt counter, records the
//! error, and either reschedules with exponential backoff
//! (`base * 2^(attempts-1)`) or dead-letters at the attempt ceiling.
//! Delivery is at-least-once; receivers are expected to dedupe on
//! `event_id`.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{DeliveryStatus, ErrorEvent, OutboxEvent, WebhookDelivery};
use crate::{EngineError, Result};

use super::storage::EngineStore;

/// Appends events and creates their delivery rows.
pub struct OutboxFanOut {
    store: Arc<dyn EngineStore>,
}

impl OutboxFanOut {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Store `event` and create one pending delivery per enabled
    /// subscription in its tenant. Returns how many deliveries were queued.
    pub async fn publish(&self, event: OutboxEvent) -> Result<usize> {
        let subscriptions = self
            .store
            .list_enabled_subscriptions(event.tenant_id)
            .await?;
        let now = Utc::now();

        self.store.append_outbox_event(event.clone()).await?;
        for subscription in &subscriptions {
            self.store
                .insert_delivery(WebhookDelivery::new(subscription, event.id, now))
                .await?;
        }

        debug!(
            event_type = %event.event_type,
            queued = subscriptions.len(),
            "outbox event published"
        );
        Ok(subscriptions.len())
    }
}

/// Counters for one delivery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub due: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

pub struct DeliveryWorker {
    store: Arc<dyn EngineStore>,
    http: Client,
    config: EngineConfig,
}

impl DeliveryWorker {
    pub fn new(store: Arc<dyn EngineStore>, config: EngineConfig) -> Self {
        Self {
            store,
            http: Client::new(),
            config,
        }
    }

    /// Attempt every delivery due at `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DeliveryStats> {
        let due = self.store.list_due_deliveries(now).await?;
        let mut stats = DeliveryStats {
            due: due.len(),
            ..DeliveryStats::default()
        };

        for delivery in due {
            match self.attempt(delivery, now).await? {
                DeliveryStatus::Success => stats.delivered += 1,
                DeliveryStatus::DeadLetter => stats.dead_lettered += 1,
                _ => stats.retried += 1,
            }
        }
        Ok(stats)
    }

    async fn attempt(
        &self,
        mut delivery: WebhookDelivery,
        now: DateTime<Utc>,
    ) -> Result<DeliveryStatus> {
        let subscription = self
            .store
            .get_subscription(delivery.subscription_id)
            .await?;
        let event = self.store.get_outbox_event(delivery.event_id).await?;

        let result = match (subscription, event) {
            (Some(subscription), Some(event)) => self.post(&subscription.url, &event).await,
            _ => Err(EngineError::NotFound(
                "subscription or event for delivery is gone".to_string(),
            )),
        };

        match result {
            Ok(()) => {
                delivery.status = DeliveryStatus::Success;
                delivery.attempts += 1;
                delivery.last_error = None;
                delivery.completed_at = Some(now);
            }
            Err(err) => {
                delivery.attempts += 1;
                delivery.last_error = Some(err.to_string());
                self.store
                    .record_error(ErrorEvent::new(
                        delivery.tenant_id,
                        "delivery",
                        "attempt_failed",
                        format!("delivery {} attempt {}: {err}", delivery.id, delivery.attempts),
                    ))
                    .await?;

                if delivery.attempts >= self.config.delivery_max_attempts {
                    warn!(delivery = %delivery.id, attempts = delivery.attempts, "delivery dead-lettered");
                    delivery.status = DeliveryStatus::DeadLetter;
                } else {
                    delivery.status = DeliveryStatus::Pending;
                    delivery.next_attempt_at = now + backoff(&self.config, delivery.attempts);
                }
            }
        }

        let status = delivery.status;
        self.store.update_delivery(delivery).await?;
        Ok(status)
    }

    async fn post(&self, url: &str, event: &OutboxEvent) -> Result<()> {
        let body = json!({
            "event_id": event.id,
            "event_type": event.event_type,
            "entity_type": event.entity_type,
            "entity_id": event.entity_id,
            "payload": event.payload,
            "timestamp": event.created_at,
        });
        let response = self
            .http
            .post(url)
            .json(&body)
            .timeout(self.config.webhook_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EngineError::Internal(format!(
                "receiver returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Reset a failed or dead-lettered delivery to pending so the next
    /// pass retries it immediately. The attempt counter is preserved as
    /// history; only the status and schedule reset.
    pub async fn replay(&self, delivery_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut delivery = self
            .store
            .get_delivery(delivery_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("delivery {delivery_id}")))?;

        match delivery.status {
            DeliveryStatus::Failed | DeliveryStatus::DeadLetter => {
                delivery.status = DeliveryStatus::Pending;
                delivery.next_attempt_at = now;
                delivery.last_error = None;
                self.store.update_delivery(delivery).await
            }
            status => Err(EngineError::InvalidInput(format!(
                "delivery {delivery_id} is {status:?}, only failed or dead-lettered deliveries can be replayed"
            ))),
        }
    }
}

fn backoff(config: &EngineConfig, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
    Duration::from_std(config.delivery_backoff_base * factor)
        .unwrap_or_else(|_| Duration::hours(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStore;
    use crate::models::WebhookSubscription;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn subscription(tenant: Uuid, url: &str) -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            url: url.to_string(),
            enabled: true,
        }
    }

    fn worker(store: Arc<InMemoryStore>) -> DeliveryWorker {
        DeliveryWorker::new(store, EngineConfig::default())
    }

    async fn publish_one(store: &Arc<InMemoryStore>, tenant: Uuid) -> OutboxEvent {
        let event = OutboxEvent::new(
            tenant,
            "item.stage_changed",
            "work_item",
            "i-1",
            json!({"to": "Active"}),
        );
        OutboxFanOut::new(store.clone())
            .publish(event.clone())
            .await
            .unwrap();
        event
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_enabled_subscription() {
        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        store
            .insert_subscription(subscription(tenant, "https://a.example.com/hook"))
            .await
            .unwrap();
        store
            .insert_subscription(subscription(tenant, "https://b.example.com/hook"))
            .await
            .unwrap();
        let mut disabled = subscription(tenant, "https://c.example.com/hook");
        disabled.enabled = false;
        store.insert_subscription(disabled).await.unwrap();
        // Another tenant's subscription never sees this event
        store
            .insert_subscription(subscription(Uuid::new_v4(), "https://d.example.com/hook"))
            .await
            .unwrap();

        let queued = publish_one(&store, tenant).await;
        let due = store.list_due_deliveries(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|d| d.event_id == queued.id));
    }

    #[tokio::test]
    async fn successful_delivery_completes_and_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"event_type": "item.stage_changed"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        store
            .insert_subscription(subscription(tenant, &server.uri()))
            .await
            .unwrap();
        publish_one(&store, tenant).await;

        let worker = worker(store.clone());
        let now = Utc::now();
        let stats = worker.run_once(now).await.unwrap();
        assert_eq!(stats.delivered, 1);

        // A later pass finds nothing due
        let again = worker.run_once(now + Duration::hours(1)).await.unwrap();
        assert_eq!(again.due, 0);
    }

    #[tokio::test]
    async fn failure_reschedules_with_exponential_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        store
            .insert_subscription(subscription(tenant, &server.uri()))
            .await
            .unwrap();
        publish_one(&store, tenant).await;

        let worker = worker(store.clone());
        let t0 = Utc::now();
        let stats = worker.run_once(t0).await.unwrap();
        assert_eq!(stats.retried, 1);

        let due = store.list_due_deliveries(t0).await.unwrap();
        assert!(due.is_empty(), "retry must wait for the backoff window");

        let delivery = &store
            .list_due_deliveries(t0 + Duration::seconds(30))
            .await
            .unwrap()[0];
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.last_error.is_some());
        assert_eq!(delivery.next_attempt_at, t0 + Duration::seconds(30));

        // Second failure doubles the delay
        let t1 = delivery.next_attempt_at;
        worker.run_once(t1).await.unwrap();
        let delivery = store.get_delivery(delivery.id).await.unwrap().unwrap();
        assert_eq!(delivery.attempts, 2);
        assert_eq!(delivery.next_attempt_at, t1 + Duration::seconds(60));

        // Each attempt also left an error event for the rollup
        let errors = store
            .list_errors_between(t0 - Duration::hours(1), t1 + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            errors.iter().filter(|e| e.component == "delivery").count(),
            2
        );
    }

    #[tokio::test]
    async fn delivery_dead_letters_at_the_attempt_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        store
            .insert_subscription(subscription(tenant, &server.uri()))
            .await
            .unwrap();
        publish_one(&store, tenant).await;

        let config = EngineConfig {
            delivery_max_attempts: 3,
            ..EngineConfig::default()
        };
        let worker = DeliveryWorker::new(store.clone(), config);

        let mut now = Utc::now();
        for round in 1..=3u32 {
            let stats = worker.run_once(now).await.unwrap();
            if round < 3 {
                assert_eq!(stats.retried, 1);
            } else {
                assert_eq!(stats.dead_lettered, 1);
            }
            now = now + Duration::hours(1);
        }

        // Dead-lettered rows are never picked up again
        let stats = worker.run_once(now + Duration::days(1)).await.unwrap();
        assert_eq!(stats.due, 0);
    }

    #[tokio::test]
    async fn replay_resets_a_dead_letter_to_pending() {
        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        let sub = subscription(tenant, "https://example.com/hook");
        store.insert_subscription(sub.clone()).await.unwrap();
        let event = publish_one(&store, tenant).await;

        let mut delivery = store.list_due_deliveries(Utc::now()).await.unwrap().remove(0);
        delivery.status = DeliveryStatus::DeadLetter;
        delivery.attempts = 5;
        delivery.last_error = Some("receiver returned 502".to_string());
        let delivery_id = delivery.id;
        store.update_delivery(delivery).await.unwrap();

        let worker = worker(store.clone());
        let now = Utc::now();
        worker.replay(delivery_id, now).await.unwrap();

        let replayed = store.get_delivery(delivery_id).await.unwrap().unwrap();
        assert_eq!(replayed.status, DeliveryStatus::Pending);
        assert_eq!(replayed.next_attempt_at, now);
        assert_eq!(replayed.attempts, 5, "attempt history is preserved");
        assert_eq!(replayed.event_id, event.id);
    }

    #[tokio::test]
    async fn replaying_a_pending_delivery_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let tenant = Uuid::new_v4();
        store
            .insert_subscription(subscription(tenant, "https://example.com/hook"))
            .await
            .unwrap();
        publish_one(&store, tenant).await;
        let delivery = store.list_due_deliveries(Utc::now()).await.unwrap().remove(0);

        let err = worker(store.clone())
            .replay(delivery.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
