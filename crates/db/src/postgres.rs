//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use quicksync_core::diff::PreviewRow;
use quicksync_core::entity::{Snapshot, StoredEntity};
use quicksync_core::plan::{check_write, ApplyOutcome, WriteOp};
use quicksync_core::run::{MigrationRun, RunEntryLog, RunFilter};
use quicksync_core::types::{EntityId, RunId};
use sqlx::PgConnection;

use crate::error::StoreError;
use crate::repositories::entity_repo::EntityRepo;
use crate::repositories::migration_run_repo::MigrationRunRepo;
use crate::repositories::run_entry_repo::RunEntryRepo;
use crate::store::{EntityStore, HistoryStore, MigrationStore};
use crate::DbPool;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Move a pending run to its terminal state inside the caller's transaction.
async fn finalize_run(
    conn: &mut PgConnection,
    run: &MigrationRun,
    entries: &[RunEntryLog],
) -> Result<(), StoreError> {
    if MigrationRunRepo::finalize(&mut *conn, run).await?.is_none() {
        return Err(match MigrationRunRepo::find_by_id(&mut *conn, run.run_id).await? {
            Some(row) => StoreError::RunFinalized {
                run_id: run.run_id,
                status: MigrationRun::try_from(row)?.status,
            },
            None => StoreError::RunNotFound(run.run_id),
        });
    }
    RunEntryRepo::insert_many(conn, entries).await?;
    Ok(())
}

/// Apply one op, locking the entity row it targets.
async fn write_entity(
    conn: &mut PgConnection,
    tenant_id: &str,
    entity_type: &str,
    run_id: RunId,
    op: &WriteOp,
) -> Result<(EntityId, i64), StoreError> {
    let external_id = op.external_id();
    let rejected = |reason: String| StoreError::Rejected {
        external_id: external_id.to_string(),
        reason,
    };

    let existing = EntityRepo::lock_by_external_id(&mut *conn, tenant_id, entity_type, external_id)
        .await?
        .map(StoredEntity::try_from)
        .transpose()?;
    check_write(op, existing.as_ref()).map_err(rejected)?;

    let written = match (op, existing) {
        (
            WriteOp::Insert {
                entity_id, fields, ..
            },
            _,
        ) => {
            EntityRepo::insert(conn, *entity_id, tenant_id, entity_type, external_id, fields, run_id)
                .await
        }
        (WriteOp::Patch { changes, .. } | WriteOp::Restore { changes, .. }, Some(current)) => {
            EntityRepo::patch(conn, current.id, changes, run_id).await
        }
        (_, None) => return Err(rejected("entity no longer exists".to_string())),
    }
    .map_err(|e| rejected(e.to_string()))?;

    Ok((written.id, written.revision))
}

#[async_trait]
impl EntityStore for PgStore {
    async fn snapshot(&self, tenant_id: &str, entity_type: &str) -> Result<Snapshot, StoreError> {
        let rows = EntityRepo::list_by_type(&self.pool, tenant_id, entity_type).await?;
        let entities = rows
            .into_iter()
            .map(StoredEntity::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Snapshot::new(entity_type, entities))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn record(&self, run: &MigrationRun, preview: &[PreviewRow]) -> Result<(), StoreError> {
        MigrationRunRepo::create(&self.pool, run, preview)
            .await?
            .ok_or(StoreError::DuplicateRun(run.run_id))?;
        Ok(())
    }

    async fn preview(&self, run_id: RunId) -> Result<Vec<PreviewRow>, StoreError> {
        MigrationRunRepo::find_preview(&self.pool, run_id)
            .await?
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn finalize(&self, run: &MigrationRun, entries: &[RunEntryLog]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        finalize_run(&mut tx, run, entries).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, run_id: RunId) -> Result<Option<MigrationRun>, StoreError> {
        MigrationRunRepo::find_for_tenant(&self.pool, tenant_id, run_id)
            .await?
            .map(MigrationRun::try_from)
            .transpose()
    }

    async fn list(&self, tenant_id: &str, filter: &RunFilter) -> Result<Vec<MigrationRun>, StoreError> {
        MigrationRunRepo::list(&self.pool, tenant_id, filter)
            .await?
            .into_iter()
            .map(MigrationRun::try_from)
            .collect()
    }

    async fn entries(&self, run_id: RunId) -> Result<Vec<RunEntryLog>, StoreError> {
        RunEntryRepo::list_by_run(&self.pool, run_id)
            .await?
            .into_iter()
            .map(RunEntryLog::try_from)
            .collect()
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn commit(
        &self,
        tenant_id: &str,
        entity_type: &str,
        ops: &[WriteOp],
        run: &MigrationRun,
        entries: &[RunEntryLog],
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Locks the run row first; a concurrent commit of the same run
        // waits here and then finds it finalized.
        finalize_run(&mut tx, run, entries).await?;

        let mut outcome = ApplyOutcome::default();
        for op in ops {
            let (entity_id, revision) =
                write_entity(&mut tx, tenant_id, entity_type, run.run_id, op).await?;
            outcome.record(op, entity_id, revision);
        }

        tx.commit().await?;
        tracing::debug!(
            tenant_id,
            entity_type,
            run_id = %run.run_id,
            inserted = outcome.inserted,
            patched = outcome.patched,
            restored = outcome.restored,
            "Migration run committed"
        );
        Ok(outcome)
    }
}
