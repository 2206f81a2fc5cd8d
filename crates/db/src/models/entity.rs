//! Entity model.

use quicksync_core::entity::{EntityState, StoredEntity};
use quicksync_core::types::{EntityId, RunId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `entities` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EntityRow {
    pub id: EntityId,
    pub tenant_id: String,
    pub entity_type: String,
    pub external_id: String,
    pub state: String,
    pub fields: serde_json::Value,
    pub revision: i64,
    pub last_run_id: Option<RunId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<EntityRow> for StoredEntity {
    type Error = StoreError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let state = EntityState::from_str(&row.state)
            .ok_or_else(|| StoreError::Decode(format!("unknown entity state '{}'", row.state)))?;
        let serde_json::Value::Object(fields) = row.fields else {
            return Err(StoreError::Decode(format!(
                "fields of entity {} are not an object",
                row.id
            )));
        };
        Ok(StoredEntity {
            id: row.id,
            external_id: row.external_id,
            state,
            fields,
            revision: row.revision,
            last_run_id: row.last_run_id,
            updated_at: row.updated_at,
        })
    }
}
