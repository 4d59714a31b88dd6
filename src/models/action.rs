// Action vocabulary and dispatch outcomes

//! # Actions
//!
//! [`ActionKind`] is the tagged vocabulary the dispatcher understands. The
//! built-in kinds are fixed; any other tag is carried as [`ActionKind::Custom`]
//! and resolved at dispatch time against the tenant's registered custom
//! action types (an explicit extension point, not reflection).
//!
//! [`ActionOutcome`] is the single result shape every dispatch produces:
//! the dispatcher never lets an error escape, every branch ends in exactly
//! one `{success, detail}` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The action dispatch vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// POST an interpolated JSON body to a tenant-configured URL
    Webhook,
    /// Write a single column on an allow-listed table, scoped by tenant
    UpdateField,
    /// Append an outbox event row
    EmitEvent,
    /// Insert a row using a field-mapping template
    CreateEntity,
    /// Append a human-readable activity event
    SendNotification,
    /// Call a chat-completion provider and optionally merge the reply
    AiPrompt,
    /// Send an email via a pluggable provider
    SendEmail,
    /// Insert a typed, directed relationship between two entities
    CreateLink,
    /// Tenant-registered slug delegating to an external HTTP handler
    Custom(String),
}

impl ActionKind {
    /// Parse an action tag. Unrecognized tags become [`ActionKind::Custom`]
    /// so the dispatcher can consult the tenant's registry.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "webhook" => Self::Webhook,
            "update_field" => Self::UpdateField,
            "emit_event" => Self::EmitEvent,
            "create_entity" => Self::CreateEntity,
            "send_notification" => Self::SendNotification,
            "ai_prompt" => Self::AiPrompt,
            "send_email" => Self::SendEmail,
            "create_link" => Self::CreateLink,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Webhook => "webhook",
            Self::UpdateField => "update_field",
            Self::EmitEvent => "emit_event",
            Self::CreateEntity => "create_entity",
            Self::SendNotification => "send_notification",
            Self::AiPrompt => "ai_prompt",
            Self::SendEmail => "send_email",
            Self::CreateLink => "create_link",
            Self::Custom(slug) => slug,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one action dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
}

impl ActionOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tags_round_trip() {
        for tag in [
            "webhook",
            "update_field",
            "emit_event",
            "create_entity",
            "send_notification",
            "ai_prompt",
            "send_email",
            "create_link",
        ] {
            let kind = ActionKind::parse(tag);
            assert!(!matches!(kind, ActionKind::Custom(_)), "{tag} parsed as custom");
            assert_eq!(kind.as_str(), tag);
        }
    }

    #[test]
    fn unknown_tag_becomes_custom() {
        assert_eq!(
            ActionKind::parse("sync_crm"),
            ActionKind::Custom("sync_crm".to_string())
        );
    }
}
