//! Migration run model.

use quicksync_core::diff::DiffCounts;
use quicksync_core::run::{MigrationMode, MigrationRun, RunFailure, RunStatus};
use quicksync_core::types::{RunId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `migration_runs` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MigrationRunRow {
    pub run_id: RunId,
    pub tenant_id: String,
    pub source_provider: String,
    pub entity_type: String,
    pub mode: String,
    pub filename: String,
    pub status: String,
    pub counts: Json<DiffCounts>,
    pub total_rows: i64,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub summary_text: Option<String>,
    pub failure_external_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl TryFrom<MigrationRunRow> for MigrationRun {
    type Error = StoreError;

    fn try_from(row: MigrationRunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::from_str(&row.status)
            .ok_or_else(|| StoreError::Decode(format!("unknown run status '{}'", row.status)))?;
        let mode = MigrationMode::from_str(&row.mode)
            .ok_or_else(|| StoreError::Decode(format!("unknown run mode '{}'", row.mode)))?;
        let failure = match (row.failure_external_id, row.failure_reason) {
            (Some(external_id), Some(reason)) => Some(RunFailure {
                external_id,
                reason,
            }),
            _ => None,
        };
        Ok(MigrationRun {
            run_id: row.run_id,
            tenant_id: row.tenant_id,
            source_provider: row.source_provider,
            entity_type: row.entity_type,
            mode,
            filename: row.filename,
            status,
            counts: row.counts.0,
            total_rows: usize::try_from(row.total_rows)
                .map_err(|_| StoreError::Decode("negative total_rows".into()))?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            summary_text: row.summary_text,
            failure,
        })
    }
}
