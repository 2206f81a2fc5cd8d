//! The system-of-record view the reconciler reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, FieldMap, RunId, Timestamp};

/// Lifecycle state of a stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Active,
    Archived,
    Trashed,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Trashed => "trashed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "trashed" => Some(Self::Trashed),
            _ => None,
        }
    }

    /// All valid state values.
    pub const ALL: &'static [&'static str] = &["active", "archived", "trashed"];
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: EntityId,
    pub external_id: String,
    pub state: EntityState,
    pub fields: FieldMap,
    /// Incremented on every write.
    pub revision: i64,
    pub last_run_id: Option<RunId>,
    pub updated_at: Timestamp,
}

/// Point-in-time copy of one tenant's entities of one type, keyed by
/// external id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entity_type: String,
    pub entities: HashMap<String, StoredEntity>,
    pub taken_at: Option<Timestamp>,
}

impl Snapshot {
    pub fn new(entity_type: impl Into<String>, entities: impl IntoIterator<Item = StoredEntity>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entities: entities
                .into_iter()
                .map(|e| (e.external_id.clone(), e))
                .collect(),
            taken_at: Some(chrono::Utc::now()),
        }
    }

    pub fn get(&self, external_id: &str) -> Option<&StoredEntity> {
        self.entities.get(external_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
