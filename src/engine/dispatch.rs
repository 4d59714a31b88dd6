// Action dispatch - the single place side effects happen

//! # Action Dispatcher
//!
//! Given an action tag, a configuration object, a tenant id and an event
//! payload, performs exactly one side effect and returns a
//! [`ActionOutcome`]. The dispatcher never lets an error escape: every
//! internal failure (missing config, validation rejection, timeout,
//! provider error) is converted to `{success: false, detail}` at the
//! boundary.
//!
//! Built-in actions are a tagged vocabulary ([`ActionKind`]); anything
//! else is looked up in the tenant's registered custom action types and
//! delegated to its external HTTP handler. All side effects are scoped to
//! the caller-supplied tenant id.

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    ActionKind, ActionOutcome, ActivityEvent, EntityLink, EntityRecord, LinkInsert, OutboxEvent,
};
use crate::{EngineError, Result};

use super::ai::{AiClient, DEFAULT_MODEL};
use super::email::{EmailMessage, Emailer};
use super::outbox::OutboxFanOut;
use super::storage::EngineStore;
use super::template::{interpolate, interpolate_value, resolve_path};

/// Tables the engine may write through `update_field` / `create_entity`.
const ALLOWED_TABLES: &[&str] = &["work_items", "tickets", "contacts", "kb_articles", "notes"];

/// Columns writable through `update_field`.
const ALLOWED_FIELDS: &[&str] = &[
    "status",
    "priority",
    "assignee",
    "due_date",
    "summary",
    "category",
    "tags",
];

/// Executes one action per call; shared across engines via `Arc`.
pub struct ActionDispatcher {
    store: Arc<dyn EngineStore>,
    outbox: OutboxFanOut,
    http: Client,
    ai: AiClient,
    email: Emailer,
    config: EngineConfig,
}

impl ActionDispatcher {
    pub fn new(store: Arc<dyn EngineStore>, config: EngineConfig) -> Self {
        let ai = AiClient::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.ai_timeout,
        );
        let email = Emailer::from_config(&config);
        Self {
            outbox: OutboxFanOut::new(store.clone()),
            store,
            http: Client::new(),
            ai,
            email,
            config,
        }
    }

    /// Swap the AI client (tests, alternate providers).
    pub fn with_ai(mut self, ai: AiClient) -> Self {
        self.ai = ai;
        self
    }

    /// Swap the email sender (tests, alternate providers).
    pub fn with_email(mut self, email: Emailer) -> Self {
        self.email = email;
        self
    }

    /// Execute one action. Never returns an error; every branch yields
    /// exactly one `{success, detail}` outcome.
    pub async fn execute(
        &self,
        action_type: &str,
        action_config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> ActionOutcome {
        let kind = ActionKind::parse(action_type);
        debug!(action = %kind, %tenant_id, "dispatching action");

        let result = match &kind {
            ActionKind::Webhook => self.run_webhook(action_config, payload).await,
            ActionKind::UpdateField => {
                self.run_update_field(action_config, tenant_id, payload).await
            }
            ActionKind::EmitEvent => self.run_emit_event(action_config, tenant_id, payload).await,
            ActionKind::CreateEntity => {
                self.run_create_entity(action_config, tenant_id, payload).await
            }
            ActionKind::SendNotification => {
                self.run_send_notification(action_config, tenant_id, payload).await
            }
            ActionKind::AiPrompt => self.run_ai_prompt(action_config, tenant_id, payload).await,
            ActionKind::SendEmail => self.run_send_email(action_config, payload).await,
            ActionKind::CreateLink => self.run_create_link(action_config, tenant_id, payload).await,
            ActionKind::Custom(slug) => {
                self.run_custom(slug, action_config, tenant_id, payload).await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(action = %kind, %tenant_id, error = %err, "action dispatch failed");
                ActionOutcome::failed(err.to_string())
            }
        }
    }

    async fn run_webhook(&self, config: &Value, payload: &Value) -> Result<ActionOutcome> {
        let url_template = required_str(config, "url")?;
        let url = interpolate(url_template, payload);
        validate_outbound_url(&url, self.config.allow_private_destinations)?;

        let body = match config.get("body") {
            Some(template) => interpolate_value(template, payload),
            None => payload.clone(),
        };

        let mut request = self
            .http
            .post(&url)
            .json(&body)
            .timeout(self.config.webhook_timeout);
        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, interpolate(value, payload));
                }
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(ActionOutcome::ok(format!("webhook delivered ({status})")))
        } else {
            Ok(ActionOutcome::failed(format!(
                "webhook returned {status} from {url}"
            )))
        }
    }

    async fn run_update_field(
        &self,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let table = required_str(config, "table")?;
        let field = required_str(config, "field")?;
        if !ALLOWED_TABLES.contains(&table) {
            return Err(EngineError::Validation(format!(
                "table '{table}' is not writable by automations"
            )));
        }
        if !ALLOWED_FIELDS.contains(&field) {
            return Err(EngineError::Validation(format!(
                "field '{field}' is not writable by automations"
            )));
        }

        let entity_id = resolve_entity_id(payload).ok_or_else(|| {
            EngineError::Configuration("payload carries no entity_id/id/after.id".to_string())
        })?;

        let value = match config.get("value") {
            Some(Value::String(template)) => Value::String(interpolate(template, payload)),
            Some(literal) => literal.clone(),
            None => return Err(EngineError::Configuration("missing required field 'value'".to_string())),
        };

        self.store
            .update_entity_field(tenant_id, table, &entity_id, field, value)
            .await?;
        Ok(ActionOutcome::ok(format!(
            "updated {table}.{field} on {entity_id}"
        )))
    }

    async fn run_emit_event(
        &self,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let event_type = interpolate(required_str(config, "event_type")?, payload);
        if event_type.is_empty() {
            return Err(EngineError::Configuration(
                "event_type interpolated to empty string".to_string(),
            ));
        }
        let entity_type = config
            .get("entity_type")
            .and_then(Value::as_str)
            .map(|t| interpolate(t, payload))
            .or_else(|| string_at(payload, "entity_type"))
            .unwrap_or_else(|| "unknown".to_string());
        let entity_id = config
            .get("entity_id")
            .and_then(Value::as_str)
            .map(|t| interpolate(t, payload))
            .or_else(|| resolve_entity_id(payload))
            .unwrap_or_default();

        // Publish rather than append directly: the fan-out creates one
        // pending delivery per enabled subscription alongside the event.
        let event = OutboxEvent::new(tenant_id, event_type.clone(), entity_type, entity_id, payload.clone());
        let queued = self.outbox.publish(event).await?;
        Ok(ActionOutcome::ok(format!(
            "emitted event {event_type} ({queued} deliveries queued)"
        )))
    }

    async fn run_create_entity(
        &self,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let table = required_str(config, "table")?;
        if !ALLOWED_TABLES.contains(&table) {
            return Err(EngineError::Validation(format!(
                "table '{table}' is not writable by automations"
            )));
        }
        let field_template = config.get("fields").and_then(Value::as_object).ok_or_else(|| {
            EngineError::Configuration("missing required object 'fields'".to_string())
        })?;

        let fields = interpolate_value(&Value::Object(field_template.clone()), payload);
        let entity = EntityRecord::new(tenant_id, table, fields);
        let id = entity.id;
        self.store.insert_entity(entity).await?;
        Ok(ActionOutcome::ok(format!("created {table} row {id}")))
    }

    async fn run_send_notification(
        &self,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let message = interpolate(required_str(config, "message")?, payload);
        let event_type = config
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("automation.notification");
        let entity_type = string_at(payload, "entity_type").unwrap_or_else(|| "unknown".to_string());
        let entity_id = resolve_entity_id(payload).unwrap_or_default();

        let event = ActivityEvent::new(
            tenant_id,
            event_type,
            entity_type,
            entity_id,
            message.clone(),
            payload.clone(),
        );
        self.store.append_activity_event(event).await?;
        Ok(ActionOutcome::ok(message))
    }

    async fn run_ai_prompt(
        &self,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let user_prompt = interpolate(required_str(config, "user_prompt")?, payload);
        let system_prompt = config
            .get("system_prompt")
            .and_then(Value::as_str)
            .map(|t| interpolate(t, payload))
            .unwrap_or_default();
        let model = config
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL);
        let temperature = config
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(0.2) as f32;

        let reply = self
            .ai
            .chat(model, temperature, &system_prompt, &user_prompt)
            .await?;

        // Optionally merge the (JSON-parsed) reply into the target entity's
        // metadata under the configured key.
        if let Some(key) = config.get("response_key").and_then(Value::as_str) {
            let table = config
                .get("table")
                .and_then(Value::as_str)
                .unwrap_or("work_items");
            let entity_id = resolve_entity_id(payload).ok_or_else(|| {
                EngineError::Configuration(
                    "response_key set but payload carries no entity id".to_string(),
                )
            })?;
            let parsed = serde_json::from_str::<Value>(&reply)
                .unwrap_or_else(|_| Value::String(reply.clone()));
            self.store
                .merge_entity_metadata(tenant_id, table, &entity_id, key, parsed)
                .await?;
            return Ok(ActionOutcome::ok(format!(
                "ai response merged into {table}.{key}"
            )));
        }

        Ok(ActionOutcome::ok(reply))
    }

    async fn run_send_email(&self, config: &Value, payload: &Value) -> Result<ActionOutcome> {
        let to = config
            .get("to")
            .and_then(Value::as_str)
            .map(|t| interpolate(t, payload))
            .unwrap_or_default();
        if to.is_empty() {
            return Err(EngineError::Configuration(
                "send_email requires a recipient".to_string(),
            ));
        }
        let message = EmailMessage {
            to,
            from: config
                .get("from")
                .and_then(Value::as_str)
                .map(|t| interpolate(t, payload))
                .unwrap_or_else(|| self.config.email_from.clone()),
            subject: config
                .get("subject")
                .and_then(Value::as_str)
                .map(|t| interpolate(t, payload))
                .unwrap_or_default(),
            body: config
                .get("body")
                .and_then(Value::as_str)
                .map(|t| interpolate(t, payload))
                .unwrap_or_default(),
        };

        let detail = self.email.send(&message).await?;
        Ok(ActionOutcome::ok(detail))
    }

    async fn run_create_link(
        &self,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let link = EntityLink {
            id: Uuid::new_v4(),
            tenant_id,
            source_type: required_str(config, "source_type")?.to_string(),
            source_id: interpolate(required_str(config, "source_id")?, payload),
            target_type: required_str(config, "target_type")?.to_string(),
            target_id: interpolate(required_str(config, "target_id")?, payload),
            link_type: required_str(config, "link_type")?.to_string(),
            created_at: Utc::now(),
        };
        if link.source_id.is_empty() || link.target_id.is_empty() {
            return Err(EngineError::Configuration(
                "link endpoints interpolated to empty ids".to_string(),
            ));
        }

        // A uniqueness hit is success: the relationship already holds.
        match self.store.insert_link(link).await? {
            LinkInsert::Inserted => Ok(ActionOutcome::ok("link created")),
            LinkInsert::AlreadyExists => Ok(ActionOutcome::ok("link already exists")),
        }
    }

    async fn run_custom(
        &self,
        slug: &str,
        config: &Value,
        tenant_id: Uuid,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let Some(custom) = self.store.find_custom_action(tenant_id, slug).await? else {
            return Ok(ActionOutcome::failed(format!("unknown action type: {slug}")));
        };

        let body = json!({
            "action_name": custom.name,
            "action_type": custom.slug,
            "action_config": config,
            "account_id": tenant_id,
            "payload": payload,
            "timestamp": Utc::now(),
        });

        let response = self
            .http
            .post(&custom.handler_url)
            .json(&body)
            .timeout(self.config.custom_handler_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(ActionOutcome::ok(format!(
                "custom handler '{slug}' accepted ({status})"
            )))
        } else {
            Ok(ActionOutcome::failed(format!(
                "custom handler '{slug}' returned {status}"
            )))
        }
    }
}

/// Resolve the target entity id from a payload: `entity_id`, `id` or
/// `after.id`, first hit wins.
fn resolve_entity_id(payload: &Value) -> Option<String> {
    for path in ["entity_id", "id", "after.id"] {
        match resolve_path(payload, path) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

fn string_at(payload: &Value, path: &str) -> Option<String> {
    resolve_path(payload, path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn required_str<'a>(config: &'a Value, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::Configuration(format!("missing required field '{key}'")))
}

/// Reject disallowed outbound destinations before dialing: non-HTTP
/// schemes, loopback/private/link-local addresses and obviously internal
/// hostnames. `allow_private` relaxes the address checks for local
/// development.
pub(crate) fn validate_outbound_url(raw: &str, allow_private: bool) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| EngineError::Validation(format!("invalid webhook url '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::Validation(format!(
            "unsupported webhook scheme '{}'",
            url.scheme()
        )));
    }
    let Some(host) = url.host_str() else {
        return Err(EngineError::Validation("webhook url has no host".to_string()));
    };
    if allow_private {
        return Ok(());
    }

    let blocked = match host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                // unique-local fc00::/7 and link-local fe80::/10
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => {
            let lower = host.to_ascii_lowercase();
            lower == "localhost"
                || lower.ends_with(".localhost")
                || lower.ends_with(".internal")
                || lower.ends_with(".local")
        }
    };

    if blocked {
        return Err(EngineError::Validation(format!(
            "webhook destination '{host}' is not allowed"
        )));
    }
    Ok(())
}
