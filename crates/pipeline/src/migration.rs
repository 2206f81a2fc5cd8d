//! The analyze -> preview -> execute -> audit flow for one tenant's import.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use quicksync_core::diff::{preview_rows, verify_against_preview, DiffCounts, DiffEntry};
use quicksync_core::error::CoreError;
use quicksync_core::format::{self, SourceFormat};
use quicksync_core::mapper::map_rows;
use quicksync_core::pagination::{clamp_limit, clamp_offset, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use quicksync_core::plan::{plan_writes, WriteOp};
use quicksync_core::profile::{MappingProfile, ProfileRegistry};
use quicksync_core::reconcile::{reclassify, reconcile};
use quicksync_core::resolve::{resolve, ApplyAction, Decision, ResolvedBatch};
use quicksync_core::run::{
    summarize, EntryOutcome, MigrationMode, MigrationRun, RunEntryLog, RunFailure, RunFilter,
    RunStatus,
};
use quicksync_core::types::{EntityId, RunId};
use quicksync_db::MigrationStore;
use serde::Serialize;

use crate::locks::TenantLocks;

/// Default wait for a tenant's execute lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub lock_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// An uploaded file to analyze.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub provider: String,
    pub filename: String,
    /// Explicitly declared format; inferred from the file otherwise.
    pub format: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub mode: MigrationMode,
}

/// Result of analyzing a file: the classified entries and the pending run
/// they belong to.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub run_id: RunId,
    pub source_provider: String,
    pub entity_type: String,
    pub filename: String,
    pub format: SourceFormat,
    pub counts: DiffCounts,
    pub entries: Vec<DiffEntry>,
}

/// A reviewed batch to apply.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    /// Run created at preview; `entries` must match what it previewed.
    /// Without it the entries are classified again and a new run is
    /// recorded.
    pub run_id: Option<RunId>,
    pub provider: String,
    pub mode: MigrationMode,
    pub filename: String,
    pub entries: Vec<DiffEntry>,
    /// Operator decisions keyed by source row index.
    pub decisions: BTreeMap<usize, Decision>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run: MigrationRun,
    /// True when the run had already completed and nothing was written.
    pub replayed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub provider: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Orchestrates a migration against the entity store and its run ledger.
///
/// Analyze is unrestricted. Execute holds the tenant's lock from the final
/// run-status check until the run is finalized, so at most one execute per
/// tenant writes at a time and a retried request observes the first one's
/// result.
pub struct MigrationPipeline {
    profiles: ProfileRegistry,
    store: Arc<dyn MigrationStore>,
    locks: TenantLocks,
    config: PipelineConfig,
}

impl MigrationPipeline {
    pub fn new(
        profiles: ProfileRegistry,
        store: Arc<dyn MigrationStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            profiles,
            store,
            locks: TenantLocks::new(),
            config,
        }
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Parse, map and reconcile a file, then record a pending run for it.
    ///
    /// Parse and mapping failures return before any run exists.
    pub async fn analyze(&self, tenant_id: &str, request: AnalyzeRequest) -> Result<Preview, CoreError> {
        let profile = self.profiles.get(&request.provider)?.clone();
        let source_format = SourceFormat::detect(
            request.format.as_deref(),
            &request.filename,
            request.content_type.as_deref(),
        )?;

        let records = {
            let profile = profile.clone();
            let bytes = request.bytes;
            tokio::task::spawn_blocking(move || {
                map_rows(format::parse_as(&bytes, source_format)?, &profile)
            })
            .await
            .map_err(|e| CoreError::Internal(format!("file decoding task failed: {e}")))??
        };

        let snapshot = self.store.snapshot(tenant_id, &profile.entity_type).await?;
        let reconciliation = reconcile(records, &snapshot, &profile);

        let run = MigrationRun::pending(
            tenant_id,
            &profile.provider,
            &profile.entity_type,
            request.mode,
            &request.filename,
            reconciliation.counts,
        );
        self.store
            .record(&run, &preview_rows(&reconciliation.entries))
            .await?;

        let counts = reconciliation.counts;
        tracing::info!(
            tenant_id,
            run_id = %run.run_id,
            provider = %profile.provider,
            format = %source_format,
            rows = counts.total(),
            new = counts.new,
            update = counts.update,
            conflict = counts.conflict,
            unchanged = counts.unchanged,
            restore = counts.restore_from_archive + counts.restore_from_trash,
            "Migration file analyzed"
        );

        Ok(Preview {
            run_id: run.run_id,
            source_provider: profile.provider,
            entity_type: profile.entity_type,
            filename: request.filename,
            format: source_format,
            counts,
            entries: reconciliation.entries,
        })
    }

    /// Apply a reviewed batch exactly once.
    ///
    /// Re-executing a completed run returns its stored result without
    /// writing. Entity writes and the completed run are committed together;
    /// a batch that fails while writing leaves the entity store untouched
    /// and the run `failed`.
    pub async fn execute(
        &self,
        tenant_id: &str,
        request: ExecuteRequest,
    ) -> Result<ExecutionReport, CoreError> {
        if request.mode == MigrationMode::Link {
            return Err(CoreError::Validation(
                "link mode is recorded at preview but cannot be executed yet".into(),
            ));
        }
        let profile = self.profiles.get(&request.provider)?;

        if let Some(run_id) = request.run_id {
            let run = self.load_run(tenant_id, run_id).await?;
            if let Some(report) = settled(run)? {
                return Ok(report);
            }
        }

        let _guard = self.locks.acquire(tenant_id, self.config.lock_timeout).await?;

        let (mut run, resolved) = match request.run_id {
            Some(run_id) => {
                let run = self.load_run(tenant_id, run_id).await?;
                if let Some(report) = settled(run.clone())? {
                    return Ok(report);
                }
                check_provider(&run, profile)?;
                let preview = self.store.preview(run_id).await?;
                verify_against_preview(&preview, &request.entries)?;
                (run, resolve(request.entries, &request.decisions)?)
            }
            None => {
                let snapshot = self.store.snapshot(tenant_id, &profile.entity_type).await?;
                let reconciliation = reclassify(request.entries, &snapshot, profile)?;
                let preview = preview_rows(&reconciliation.entries);
                let resolved = resolve(reconciliation.entries, &request.decisions)?;
                let run = MigrationRun::pending(
                    tenant_id,
                    &profile.provider,
                    &profile.entity_type,
                    request.mode,
                    &request.filename,
                    reconciliation.counts,
                );
                self.store.record(&run, &preview).await?;
                (run, resolved)
            }
        };

        let ops = plan_writes(&resolved.accepted);
        let logs = entry_logs(run.run_id, &resolved, &ops);
        let mut completed = run.clone();
        completed.complete(summarize(&logs))?;

        match self
            .store
            .commit(tenant_id, &run.entity_type, &ops, &completed, &logs)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    tenant_id,
                    run_id = %completed.run_id,
                    inserted = outcome.inserted,
                    patched = outcome.patched,
                    restored = outcome.restored,
                    skipped = resolved.skipped.len(),
                    "Migration run completed"
                );
                Ok(ExecutionReport {
                    run: completed,
                    replayed: false,
                })
            }
            Err(store_err) => {
                let err = CoreError::from(store_err);
                let failure = match &err {
                    CoreError::Execution {
                        external_id,
                        reason,
                    } => RunFailure {
                        external_id: external_id.clone(),
                        reason: reason.clone(),
                    },
                    other => RunFailure {
                        external_id: String::new(),
                        reason: other.to_string(),
                    },
                };
                run.fail(failure)?;
                // Refused when the commit landed despite the error; the
                // completed run then stands and a retry replays it.
                if let Err(finalize_err) = self.store.finalize(&run, &[]).await {
                    tracing::error!(
                        run_id = %run.run_id,
                        error = %finalize_err,
                        "Failed to record failed migration run"
                    );
                }
                tracing::warn!(
                    tenant_id,
                    run_id = %run.run_id,
                    error = %err,
                    "Migration run failed"
                );
                Err(err)
            }
        }
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<MigrationRun>, CoreError> {
        let filter = RunFilter {
            provider: query.provider.filter(|p| !p.trim().is_empty()),
            status: query.status,
            limit: clamp_limit(query.limit, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT),
            offset: clamp_offset(query.offset),
        };
        Ok(self.store.list(tenant_id, &filter).await?)
    }

    pub async fn run(&self, tenant_id: &str, run_id: RunId) -> Result<MigrationRun, CoreError> {
        self.load_run(tenant_id, run_id).await
    }

    pub async fn run_entries(
        &self,
        tenant_id: &str,
        run_id: RunId,
    ) -> Result<Vec<RunEntryLog>, CoreError> {
        self.load_run(tenant_id, run_id).await?;
        Ok(self.store.entries(run_id).await?)
    }

    pub async fn health_check(&self) -> Result<(), CoreError> {
        Ok(self.store.ping().await?)
    }

    async fn load_run(&self, tenant_id: &str, run_id: RunId) -> Result<MigrationRun, CoreError> {
        self.store
            .get(tenant_id, run_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "migration_run",
                id: run_id.to_string(),
            })
    }
}

/// The stored result of a run that has already been finalized, or `None`
/// if it is still pending.
fn settled(run: MigrationRun) -> Result<Option<ExecutionReport>, CoreError> {
    match run.status {
        RunStatus::Pending => Ok(None),
        RunStatus::Completed => {
            tracing::info!(run_id = %run.run_id, "Run already completed; returning stored result");
            Ok(Some(ExecutionReport {
                run,
                replayed: true,
            }))
        }
        RunStatus::Failed => Err(CoreError::Conflict(format!(
            "run {} failed; analyze the file again to start a new run",
            run.run_id
        ))),
    }
}

fn check_provider(run: &MigrationRun, profile: &MappingProfile) -> Result<(), CoreError> {
    if !run.source_provider.eq_ignore_ascii_case(&profile.provider) {
        return Err(CoreError::Validation(format!(
            "run {} was analyzed for '{}', not '{}'",
            run.run_id, run.source_provider, profile.provider
        )));
    }
    Ok(())
}

/// One log line per entry, in source row order. Rows that write an entity
/// created earlier in the same batch log the id planned for it.
fn entry_logs(run_id: RunId, resolved: &ResolvedBatch, ops: &[WriteOp]) -> Vec<RunEntryLog> {
    let inserted: HashMap<&str, EntityId> = ops
        .iter()
        .filter_map(|op| Some((op.external_id(), op.inserted_id()?)))
        .collect();

    let applied = resolved.accepted.iter().map(|a| {
        let outcome = match a.action {
            ApplyAction::Insert => EntryOutcome::Inserted,
            ApplyAction::Patch => EntryOutcome::Patched,
            ApplyAction::Restore { .. } => EntryOutcome::Restored,
        };
        let entity_id = a
            .entry
            .target_entity_id
            .or_else(|| inserted.get(a.entry.external_id.as_str()).copied());
        (&a.entry, outcome, entity_id)
    });
    let skipped = resolved.skipped.iter().map(|s| {
        let entity_id = s
            .entry
            .target_entity_id
            .or_else(|| inserted.get(s.entry.external_id.as_str()).copied());
        (&s.entry, s.outcome, entity_id)
    });

    let mut logs: Vec<RunEntryLog> = applied
        .chain(skipped)
        .map(|(entry, outcome, entity_id)| RunEntryLog {
            run_id,
            source_row_index: entry.source_row_index,
            external_id: entry.external_id.clone(),
            entry_type: entry.entry_type,
            outcome,
            entity_id,
        })
        .collect();
    logs.sort_by_key(|l| l.source_row_index);
    logs
}
