// Generic entity rows and typed entity links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Generic row targeted by `create_entity` / `update_field` actions.
///
/// The engine only ever touches tables on its allow-list; the real
/// resource handlers own the full schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub table: String,
    pub fields: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn new(tenant_id: Uuid, table: impl Into<String>, fields: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            table: table.into(),
            fields,
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}

/// Typed, directed relationship between two entities.
///
/// Uniqueness over `(source_type, source_id, target_type, target_id,
/// link_type)` within a tenant is enforced by the store; a duplicate
/// insert reports [`LinkInsert::AlreadyExists`] instead of erroring, which
/// makes `create_link` idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLink {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source_type: String,
    pub source_id: String,
    pub target_type: String,
    pub target_id: String,
    pub link_type: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an insert-or-detect-existing link write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInsert {
    Inserted,
    AlreadyExists,
}

impl EntityLink {
    /// The tuple the store de-duplicates on.
    pub fn unique_key(&self) -> (Uuid, &str, &str, &str, &str, &str) {
        (
            self.tenant_id,
            &self.source_type,
            &self.source_id,
            &self.target_type,
            &self.target_id,
            &self.link_type,
        )
    }
}
