// Pluggable email providers for send_email actions

//! # Email Providers
//!
//! Two first-class transactional HTTP providers (SendGrid and Postmark)
//! plus a generic webhook fallback used when no provider key is
//! configured. Provider selection happens once at construction from
//! [`EngineConfig`](crate::config::EngineConfig); every field of an
//! outgoing message is already interpolated by the dispatcher.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::{EngineError, Result};

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const POSTMARK_URL: &str = "https://api.postmarkapp.com/email";

/// One outbound message, fully templated by the caller.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Provider {
    SendGrid { api_key: String },
    Postmark { api_key: String },
    Webhook { url: String },
}

/// Email sender with the provider baked in at construction.
#[derive(Clone)]
pub struct Emailer {
    client: Client,
    provider: Option<Provider>,
    endpoint_override: Option<String>,
    timeout: Duration,
}

impl Emailer {
    /// Pick a provider from configuration: a named provider with its key,
    /// otherwise the webhook fallback when a URL is configured, otherwise
    /// unconfigured (sends fail fast with a configuration error).
    pub fn from_config(config: &EngineConfig) -> Self {
        let provider = match (config.email_provider.as_str(), &config.email_api_key) {
            ("sendgrid", Some(key)) => Some(Provider::SendGrid {
                api_key: key.clone(),
            }),
            ("postmark", Some(key)) => Some(Provider::Postmark {
                api_key: key.clone(),
            }),
            _ => config
                .email_webhook_url
                .clone()
                .map(|url| Provider::Webhook { url }),
        };

        Self {
            client: Client::new(),
            provider,
            endpoint_override: None,
            timeout: config.email_timeout,
        }
    }

    /// Point provider calls at a different base endpoint. Test hook.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// Send one message; returns a short human-readable detail on success.
    pub async fn send(&self, message: &EmailMessage) -> Result<String> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            EngineError::Configuration(
                "no email provider configured (set RELAY_EMAIL_PROVIDER or RELAY_EMAIL_WEBHOOK_URL)"
                    .to_string(),
            )
        })?;

        match provider {
            Provider::SendGrid { api_key } => {
                let url = self
                    .endpoint_override
                    .clone()
                    .unwrap_or_else(|| SENDGRID_URL.to_string());
                let body = json!({
                    "personalizations": [{"to": [{"email": message.to}]}],
                    "from": {"email": message.from},
                    "subject": message.subject,
                    "content": [{"type": "text/plain", "value": message.body}],
                });
                self.post(&url, Some(("authorization", format!("Bearer {api_key}"))), body)
                    .await?;
                Ok(format!("email sent to {} via sendgrid", message.to))
            }
            Provider::Postmark { api_key } => {
                let url = self
                    .endpoint_override
                    .clone()
                    .unwrap_or_else(|| POSTMARK_URL.to_string());
                let body = json!({
                    "From": message.from,
                    "To": message.to,
                    "Subject": message.subject,
                    "TextBody": message.body,
                });
                self.post(&url, Some(("x-postmark-server-token", api_key.clone())), body)
                    .await?;
                Ok(format!("email sent to {} via postmark", message.to))
            }
            Provider::Webhook { url } => {
                let target = self.endpoint_override.clone().unwrap_or_else(|| url.clone());
                let body = json!({
                    "to": message.to,
                    "from": message.from,
                    "subject": message.subject,
                    "body": message.body,
                });
                self.post(&target, None, body).await?;
                Ok(format!("email sent to {} via webhook", message.to))
            }
        }
    }

    async fn post(
        &self,
        url: &str,
        header: Option<(&str, String)>,
        body: serde_json::Value,
    ) -> Result<()> {
        let mut request = self.client.post(url).json(&body).timeout(self.timeout);
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EngineError::Internal(format!(
                "email provider returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
