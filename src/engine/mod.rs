// Engine modules: evaluation, dispatch, delivery and supporting plumbing

pub mod ai;
pub mod automation;
pub mod conditions;
pub mod dispatch;
pub mod email;
pub mod outbox;
pub mod rollup;
pub mod scheduler;
pub mod stage_actions;
pub mod storage;
pub mod template;

pub use ai::AiClient;
pub use automation::{AutomationEngine, EvaluationSummary};
pub use conditions::conditions_pass;
pub use dispatch::ActionDispatcher;
pub use email::{EmailMessage, Emailer};
pub use outbox::{DeliveryStats, DeliveryWorker, OutboxFanOut};
pub use rollup::{MetricsRollup, RollupStats};
pub use scheduler::{SweepStats, TriggerSweep};
pub use stage_actions::StageActionEngine;
pub use storage::{EngineStore, InMemoryStore};
pub use template::{interpolate, interpolate_value, resolve_path};
