//! Storage seams used by the migration pipeline.
//!
//! All traits are object-safe so the pipeline can hold either the
//! PostgreSQL or the in-memory implementation behind an
//! `Arc<dyn MigrationStore>`.

use async_trait::async_trait;
use quicksync_core::diff::PreviewRow;
use quicksync_core::entity::Snapshot;
use quicksync_core::plan::{ApplyOutcome, WriteOp};
use quicksync_core::run::{MigrationRun, RunEntryLog, RunFilter};
use quicksync_core::types::RunId;

use crate::error::StoreError;

/// The system of record, seen as a key-value store of entities per tenant
/// and entity type.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Every entity of `entity_type` for the tenant, in any state.
    async fn snapshot(&self, tenant_id: &str, entity_type: &str) -> Result<Snapshot, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Append-only ledger of migration runs.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record a new pending run with the rows classified for it.
    async fn record(&self, run: &MigrationRun, preview: &[PreviewRow]) -> Result<(), StoreError>;

    /// Rows classified when the run was recorded.
    async fn preview(&self, run_id: RunId) -> Result<Vec<PreviewRow>, StoreError>;

    /// Persist the terminal state of a run that wrote nothing. Only a run
    /// that is still pending may be finalized.
    async fn finalize(&self, run: &MigrationRun, entries: &[RunEntryLog]) -> Result<(), StoreError>;

    async fn get(&self, tenant_id: &str, run_id: RunId) -> Result<Option<MigrationRun>, StoreError>;

    /// Runs of a tenant, newest first.
    async fn list(&self, tenant_id: &str, filter: &RunFilter) -> Result<Vec<MigrationRun>, StoreError>;

    /// Per-entry log of a run, in source row order.
    async fn entries(&self, run_id: RunId) -> Result<Vec<RunEntryLog>, StoreError>;
}

/// Entities and the run ledger behind one commit.
#[async_trait]
pub trait MigrationStore: EntityStore + HistoryStore {
    /// Apply `ops` in order and finalize `run` with its per-entry log as
    /// one unit.
    ///
    /// Either every op is written (each written entity gets `revision + 1`
    /// and `last_run_id = run.run_id`) and the run is stored as given, or
    /// nothing changes. The first refused op is reported as
    /// [`StoreError::Rejected`]; a run that is no longer pending as
    /// [`StoreError::RunFinalized`].
    async fn commit(
        &self,
        tenant_id: &str,
        entity_type: &str,
        ops: &[WriteOp],
        run: &MigrationRun,
        entries: &[RunEntryLog],
    ) -> Result<ApplyOutcome, StoreError>;
}
