// Engine configuration sourced from the environment
// Read once at startup and passed into the engines that need it; nothing in
// the engine reads the environment after construction.

use std::env;
use std::time::Duration;

/// Tunable knobs for the automation and delivery engines.
///
/// Every field has a default suitable for development. Production values
/// come from environment variables via [`EngineConfig::from_env`], loaded
/// after `dotenv` has run in the server binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for tenant-configured outbound webhook actions
    pub webhook_timeout: Duration,
    /// Permit loopback/private webhook destinations (local development only)
    pub allow_private_destinations: bool,
    /// Timeout for POSTs to tenant-registered custom action handlers
    pub custom_handler_timeout: Duration,
    /// Timeout for AI chat-completion calls
    pub ai_timeout: Duration,
    /// Timeout for email provider calls
    pub email_timeout: Duration,
    /// Delivery attempts before a webhook delivery is dead-lettered
    pub delivery_max_attempts: u32,
    /// Base delay for exponential delivery retry backoff
    pub delivery_backoff_base: Duration,
    /// Raw error events older than this are pruned by the metrics rollup
    pub error_retention_days: i64,
    /// API key for the OpenAI-compatible completion provider
    pub openai_api_key: Option<String>,
    /// Base URL for the completion provider
    pub openai_base_url: String,
    /// Selected email provider: "sendgrid", "postmark" or "webhook"
    pub email_provider: String,
    /// API key for the selected email provider
    pub email_api_key: Option<String>,
    /// Fallback webhook URL used when no email provider key is configured
    pub email_webhook_url: Option<String>,
    /// Default sender address for outbound email
    pub email_from: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_timeout: Duration::from_secs(10),
            allow_private_destinations: false,
            custom_handler_timeout: Duration::from_secs(30),
            ai_timeout: Duration::from_secs(30),
            email_timeout: Duration::from_secs(15),
            delivery_max_attempts: 5,
            delivery_backoff_base: Duration::from_secs(30),
            error_retention_days: 14,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".to_string(),
            email_provider: "webhook".to_string(),
            email_api_key: None,
            email_webhook_url: None,
            email_from: "noreply@example.com".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            webhook_timeout: env_secs("RELAY_WEBHOOK_TIMEOUT_SECS", defaults.webhook_timeout),
            allow_private_destinations: env_parse(
                "RELAY_ALLOW_PRIVATE_DESTINATIONS",
                defaults.allow_private_destinations,
            ),
            custom_handler_timeout: env_secs(
                "RELAY_CUSTOM_HANDLER_TIMEOUT_SECS",
                defaults.custom_handler_timeout,
            ),
            ai_timeout: env_secs("RELAY_AI_TIMEOUT_SECS", defaults.ai_timeout),
            email_timeout: env_secs("RELAY_EMAIL_TIMEOUT_SECS", defaults.email_timeout),
            delivery_max_attempts: env_parse(
                "RELAY_DELIVERY_MAX_ATTEMPTS",
                defaults.delivery_max_attempts,
            ),
            delivery_backoff_base: env_secs(
                "RELAY_DELIVERY_BACKOFF_SECS",
                defaults.delivery_backoff_base,
            ),
            error_retention_days: env_parse(
                "RELAY_ERROR_RETENTION_DAYS",
                defaults.error_retention_days,
            ),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            email_provider: env::var("RELAY_EMAIL_PROVIDER").unwrap_or(defaults.email_provider),
            email_api_key: env::var("RELAY_EMAIL_API_KEY").ok(),
            email_webhook_url: env::var("RELAY_EMAIL_WEBHOOK_URL").ok(),
            email_from: env::var("RELAY_EMAIL_FROM").unwrap_or(defaults.email_from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.webhook_timeout, Duration::from_secs(10));
        assert_eq!(config.delivery_max_attempts, 5);
        assert_eq!(config.error_retention_days, 14);
        assert_eq!(config.email_provider, "webhook");
    }
}
