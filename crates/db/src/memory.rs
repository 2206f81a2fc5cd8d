//! In-memory store for tests and database-less local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use quicksync_core::diff::PreviewRow;
use quicksync_core::entity::{Snapshot, StoredEntity};
use quicksync_core::plan::{apply_write, ApplyOutcome, WriteOp};
use quicksync_core::run::{MigrationRun, RunEntryLog, RunFilter, RunStatus};
use quicksync_core::types::RunId;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{EntityStore, HistoryStore, MigrationStore};

type EntityKey = (String, String);

#[derive(Default)]
struct MemoryState {
    /// Entities keyed by `(tenant_id, entity_type)`, then external id.
    entities: HashMap<EntityKey, HashMap<String, StoredEntity>>,
    runs: HashMap<RunId, MigrationRun>,
    previews: HashMap<RunId, Vec<PreviewRow>>,
    entries: HashMap<RunId, Vec<RunEntryLog>>,
}

impl MemoryState {
    fn ensure_pending(&self, run_id: RunId) -> Result<(), StoreError> {
        let stored = self.runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if stored.status != RunStatus::Pending {
            return Err(StoreError::RunFinalized {
                run_id,
                status: stored.status,
            });
        }
        Ok(())
    }
}

/// Entities and run ledger under one lock, so a commit is all or nothing.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put entities in place directly, bypassing run bookkeeping.
    pub async fn seed(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entities: impl IntoIterator<Item = StoredEntity>,
    ) {
        let mut state = self.state.write().await;
        let bucket = state
            .entities
            .entry((tenant_id.to_string(), entity_type.to_string()))
            .or_default();
        for entity in entities {
            bucket.insert(entity.external_id.clone(), entity);
        }
    }

    pub async fn entity(
        &self,
        tenant_id: &str,
        entity_type: &str,
        external_id: &str,
    ) -> Option<StoredEntity> {
        self.state
            .read()
            .await
            .entities
            .get(&(tenant_id.to_string(), entity_type.to_string()))
            .and_then(|bucket| bucket.get(external_id).cloned())
    }

    pub async fn run_count(&self) -> usize {
        self.state.read().await.runs.len()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn snapshot(&self, tenant_id: &str, entity_type: &str) -> Result<Snapshot, StoreError> {
        let state = self.state.read().await;
        let entities = state
            .entities
            .get(&(tenant_id.to_string(), entity_type.to_string()))
            .map(|bucket| bucket.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(Snapshot::new(entity_type, entities))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn record(&self, run: &MigrationRun, preview: &[PreviewRow]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.run_id) {
            return Err(StoreError::DuplicateRun(run.run_id));
        }
        state.runs.insert(run.run_id, run.clone());
        state.previews.insert(run.run_id, preview.to_vec());
        Ok(())
    }

    async fn preview(&self, run_id: RunId) -> Result<Vec<PreviewRow>, StoreError> {
        self.state
            .read()
            .await
            .previews
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn finalize(&self, run: &MigrationRun, entries: &[RunEntryLog]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.ensure_pending(run.run_id)?;
        state.runs.insert(run.run_id, run.clone());
        state.entries.insert(run.run_id, entries.to_vec());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, run_id: RunId) -> Result<Option<MigrationRun>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .runs
            .get(&run_id)
            .filter(|run| run.tenant_id == tenant_id)
            .cloned())
    }

    async fn list(&self, tenant_id: &str, filter: &RunFilter) -> Result<Vec<MigrationRun>, StoreError> {
        let state = self.state.read().await;
        let mut runs: Vec<&MigrationRun> = state
            .runs
            .values()
            .filter(|run| run.tenant_id == tenant_id && filter.matches(run))
            .collect();
        runs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        Ok(runs
            .into_iter()
            .skip(usize::try_from(filter.offset).unwrap_or(0))
            .take(usize::try_from(filter.limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn entries(&self, run_id: RunId) -> Result<Vec<RunEntryLog>, StoreError> {
        let mut entries = self
            .state
            .read()
            .await
            .entries
            .get(&run_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.source_row_index);
        Ok(entries)
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn commit(
        &self,
        tenant_id: &str,
        entity_type: &str,
        ops: &[WriteOp],
        run: &MigrationRun,
        entries: &[RunEntryLog],
    ) -> Result<ApplyOutcome, StoreError> {
        let key = (tenant_id.to_string(), entity_type.to_string());
        let mut state = self.state.write().await;
        state.ensure_pending(run.run_id)?;

        // Work on a copy so a refused op leaves the store untouched.
        let mut working = state.entities.get(&key).cloned().unwrap_or_default();
        let mut outcome = ApplyOutcome::default();
        let now = chrono::Utc::now();

        for op in ops {
            let written = apply_write(op, working.get(op.external_id()), run.run_id, now)
                .map_err(|reason| StoreError::Rejected {
                    external_id: op.external_id().to_string(),
                    reason,
                })?;
            outcome.record(op, written.id, written.revision);
            working.insert(written.external_id.clone(), written);
        }

        state.entities.insert(key, working);
        state.runs.insert(run.run_id, run.clone());
        state.entries.insert(run.run_id, entries.to_vec());
        Ok(outcome)
    }
}
