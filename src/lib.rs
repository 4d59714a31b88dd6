// Relay Engine - multi-tenant event-driven automation and delivery
// Reacts to domain events by evaluating tenant-defined rules and dispatching
// side-effecting actions, with retryable outbound webhook delivery and a
// countdown-trigger scheduler.

//! # Relay Engine Library
//!
//! This crate implements the automation core of a multi-tenant business
//! application:
//!
//! - **Template interpolation** (`engine::template`): `{{path}}` placeholder
//!   substitution over structured payloads
//! - **Condition evaluation** (`engine::conditions`): AND-combined
//!   field/operator/value clauses against event payloads
//! - **Action dispatch** (`engine::dispatch`): a fixed action vocabulary
//!   (webhooks, field mutations, event emission, AI calls, email, entity
//!   links) plus tenant-registered custom HTTP handlers
//! - **Automation rules** (`engine::automation`): event-triggered rule
//!   evaluation with per-rule failure isolation and countdown spawning
//! - **Stage actions** (`engine::stage_actions`): workflow-lifecycle actions
//!   with an explicit exit -> transition -> mutate -> enter pipeline
//! - **Scheduling** (`engine::scheduler`): countdown-trigger sweep with
//!   exactly-once instance claiming
//! - **Delivery** (`engine::outbox`): at-least-once outbound webhook
//!   delivery with retry, dead-lettering and manual replay
//! - **Metrics** (`engine::rollup`): hourly aggregation of errors,
//!   scheduler throughput and delivery outcomes
//!
//! The HTTP surface (`api`) exposes the inbound webhook mapper that lets
//! external systems drive the same engines through tenant-configured
//! mappings.
//!
//! All engines take an explicit [`EngineStore`](engine::storage::EngineStore)
//! handle at construction; [`InMemoryStore`](engine::storage::InMemoryStore)
//! backs tests and single-process deployments.

// Core domain models (storage- and transport-agnostic)
pub mod models;

// Execution engines
pub mod engine;

// HTTP API surface (inbound webhooks, replay, health)
pub mod api;

// Environment-driven configuration
pub mod config;

// Re-export the types most callers need, flattening the module hierarchy
pub use config::EngineConfig;
pub use engine::automation::AutomationEngine;
pub use engine::dispatch::ActionDispatcher;
pub use engine::outbox::{DeliveryWorker, OutboxFanOut};
pub use engine::rollup::MetricsRollup;
pub use engine::scheduler::TriggerSweep;
pub use engine::stage_actions::StageActionEngine;
pub use engine::storage::{EngineStore, InMemoryStore};
pub use models::action::ActionOutcome;

use thiserror::Error;

/// Error type shared across the engine.
///
/// Failures at the rule/mapping/action boundary are converted into
/// [`ActionOutcome`] values rather than propagated; this enum covers the
/// places where a genuine `Result` is the right shape (storage, HTTP
/// handlers, provider clients).
#[derive(Error, Debug)]
pub enum EngineError {
    /// A referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied configuration or payload is invalid
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Required action configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Authentication failed (unknown or disabled API key)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Validation rejected the operation before any side effect
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage-related errors from any backend
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound HTTP call failed (timeout, connect error, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error that does not fit the other variants
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
