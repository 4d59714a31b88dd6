// Domain models for the automation engine
// Pure data types shared by the engines, the storage layer and the API.
// Everything here is serde-serializable and free of behavior beyond small
// constructors and accessors.

pub mod action;
pub mod entity;
pub mod event;
pub mod rule;
pub mod trigger;
pub mod webhook;
pub mod workflow;

pub use action::{ActionKind, ActionOutcome};
pub use entity::{EntityLink, EntityRecord, LinkInsert};
pub use event::{ActivityEvent, ErrorEvent, MetricsSnapshot, OutboxEvent};
pub use rule::{AutomationRule, Condition, ConditionOperator};
pub use trigger::{InstanceStatus, ScheduledTrigger, ScheduledTriggerInstance};
pub use webhook::{
    CustomActionType, DeliveryStatus, InboundApiKey, InboundMapping, MappingAction,
    WebhookDelivery, WebhookSubscription,
};
pub use workflow::{Stage, StageAction, StageTrigger, Transition, WorkItem, WorkflowDefinition};
