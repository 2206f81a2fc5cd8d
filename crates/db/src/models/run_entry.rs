//! Per-entry run log model.

use quicksync_core::diff::DiffType;
use quicksync_core::run::{EntryOutcome, RunEntryLog};
use quicksync_core::types::{EntityId, RunId};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `migration_run_entries` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RunEntryRow {
    pub run_id: RunId,
    pub source_row_index: i64,
    pub external_id: String,
    pub entry_type: String,
    pub outcome: String,
    pub entity_id: Option<EntityId>,
}

impl TryFrom<RunEntryRow> for RunEntryLog {
    type Error = StoreError;

    fn try_from(row: RunEntryRow) -> Result<Self, Self::Error> {
        Ok(RunEntryLog {
            run_id: row.run_id,
            source_row_index: usize::try_from(row.source_row_index)
                .map_err(|_| StoreError::Decode("negative source_row_index".into()))?,
            external_id: row.external_id,
            entry_type: DiffType::from_str(&row.entry_type).ok_or_else(|| {
                StoreError::Decode(format!("unknown entry type '{}'", row.entry_type))
            })?,
            outcome: EntryOutcome::from_str(&row.outcome)
                .ok_or_else(|| StoreError::Decode(format!("unknown outcome '{}'", row.outcome)))?,
            entity_id: row.entity_id,
        })
    }
}
