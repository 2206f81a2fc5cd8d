//! Turning accepted entries into an ordered list of entity writes, and the
//! rules every store applies before performing one.

use serde::Serialize;

use crate::entity::{EntityState, StoredEntity};
use crate::resolve::{AcceptedEntry, ApplyAction};
use crate::types::{EntityId, FieldMap, RunId, Timestamp};

/// One write against the entity store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create an active entity with all incoming fields. The id is
    /// assigned when the write is planned.
    Insert {
        entity_id: EntityId,
        external_id: String,
        fields: FieldMap,
        source_row_index: usize,
    },
    /// Merge `changes` into an active entity.
    Patch {
        external_id: String,
        changes: FieldMap,
        /// `None` when an earlier write in the same batch already touched
        /// the entity.
        base_revision: Option<i64>,
        source_row_index: usize,
    },
    /// Bring an archived or trashed entity back to active, merging
    /// `changes` (possibly empty).
    Restore {
        external_id: String,
        from: EntityState,
        changes: FieldMap,
        base_revision: Option<i64>,
        source_row_index: usize,
    },
}

impl WriteOp {
    /// Id of the entity created by an insert. Patches and restores write
    /// whatever entity is stored under the external id.
    pub fn inserted_id(&self) -> Option<EntityId> {
        match self {
            Self::Insert { entity_id, .. } => Some(*entity_id),
            Self::Patch { .. } | Self::Restore { .. } => None,
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            Self::Insert { external_id, .. }
            | Self::Patch { external_id, .. }
            | Self::Restore { external_id, .. } => external_id,
        }
    }

    pub fn source_row_index(&self) -> usize {
        match self {
            Self::Insert {
                source_row_index, ..
            }
            | Self::Patch {
                source_row_index, ..
            }
            | Self::Restore {
                source_row_index, ..
            } => *source_row_index,
        }
    }

    fn group(&self) -> u8 {
        match self {
            Self::Restore { .. } => 0,
            Self::Insert { .. } => 1,
            Self::Patch { .. } => 2,
        }
    }
}

/// Order accepted entries as restores, then inserts, then patches, keeping
/// source order within each group.
pub fn plan_writes(accepted: &[AcceptedEntry]) -> Vec<WriteOp> {
    let mut ops: Vec<WriteOp> = accepted.iter().map(write_for).collect();
    ops.sort_by_key(WriteOp::group);
    ops
}

fn write_for(accepted: &AcceptedEntry) -> WriteOp {
    let entry = &accepted.entry;
    let changes: FieldMap = entry
        .changed_fields
        .iter()
        .map(|c| (c.field.clone(), c.new.clone()))
        .collect();

    match accepted.action {
        ApplyAction::Insert => WriteOp::Insert {
            entity_id: uuid::Uuid::now_v7(),
            external_id: entry.external_id.clone(),
            fields: entry.fields.clone(),
            source_row_index: entry.source_row_index,
        },
        ApplyAction::Patch => WriteOp::Patch {
            external_id: entry.external_id.clone(),
            changes,
            base_revision: entry.base_revision,
            source_row_index: entry.source_row_index,
        },
        ApplyAction::Restore { from } => WriteOp::Restore {
            external_id: entry.external_id.clone(),
            from,
            changes,
            base_revision: entry.base_revision,
            source_row_index: entry.source_row_index,
        },
    }
}

/// Decide whether `op` may be applied given the entity currently stored
/// under its external id. Returns the rejection reason otherwise.
pub fn check_write(op: &WriteOp, existing: Option<&StoredEntity>) -> Result<(), String> {
    match (op, existing) {
        (WriteOp::Insert { .. }, None) => Ok(()),
        (WriteOp::Insert { .. }, Some(e)) => Err(format!(
            "an entity with this external id already exists ({})",
            e.state
        )),
        (WriteOp::Patch { .. } | WriteOp::Restore { .. }, None) => {
            Err("entity no longer exists".to_string())
        }
        (WriteOp::Patch { base_revision, .. }, Some(e)) => {
            if e.state != EntityState::Active {
                return Err(format!("entity is {}, not active", e.state));
            }
            check_revision(*base_revision, e)
        }
        (
            WriteOp::Restore {
                from, base_revision, ..
            },
            Some(e),
        ) => {
            if e.state != *from {
                return Err(format!("entity is {}, expected {from}", e.state));
            }
            check_revision(*base_revision, e)
        }
    }
}

fn check_revision(base_revision: Option<i64>, entity: &StoredEntity) -> Result<(), String> {
    match base_revision {
        Some(base) if base != entity.revision => Err(format!(
            "entity changed since preview (revision {base} -> {})",
            entity.revision
        )),
        _ => Ok(()),
    }
}

/// Apply `op` to an in-memory entity, returning the entity as it must be
/// stored afterwards. Fails with the rejection reason from [`check_write`].
pub fn apply_write(
    op: &WriteOp,
    existing: Option<&StoredEntity>,
    run_id: RunId,
    now: Timestamp,
) -> Result<StoredEntity, String> {
    check_write(op, existing)?;
    let written = match (op, existing) {
        (
            WriteOp::Insert {
                entity_id,
                external_id,
                fields,
                ..
            },
            _,
        ) => StoredEntity {
            id: *entity_id,
            external_id: external_id.clone(),
            state: EntityState::Active,
            fields: fields.clone(),
            revision: 1,
            last_run_id: Some(run_id),
            updated_at: now,
        },
        (WriteOp::Patch { changes, .. } | WriteOp::Restore { changes, .. }, Some(current)) => {
            let mut next = current.clone();
            for (field, value) in changes {
                next.fields.insert(field.clone(), value.clone());
            }
            next.state = EntityState::Active;
            next.revision += 1;
            next.last_run_id = Some(run_id);
            next.updated_at = now;
            next
        }
        (_, None) => return Err("entity no longer exists".to_string()),
    };
    Ok(written)
}

/// Entity written by one op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedWrite {
    pub source_row_index: usize,
    pub external_id: String,
    pub entity_id: EntityId,
    pub revision: i64,
}

/// Result of applying a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub patched: usize,
    pub restored: usize,
    pub writes: Vec<AppliedWrite>,
}

impl ApplyOutcome {
    pub fn record(&mut self, op: &WriteOp, entity_id: EntityId, revision: i64) {
        match op {
            WriteOp::Insert { .. } => self.inserted += 1,
            WriteOp::Patch { .. } => self.patched += 1,
            WriteOp::Restore { .. } => self.restored += 1,
        }
        self.writes.push(AppliedWrite {
            source_row_index: op.source_row_index(),
            external_id: op.external_id().to_string(),
            entity_id,
            revision,
        });
    }
}
