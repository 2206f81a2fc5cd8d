//! Orchestration of legacy data migrations.
//!
//! [`MigrationPipeline`] ties the pure steps in `quicksync-core` (decode,
//! map, reconcile, resolve, plan) to the stores in `quicksync-db`, and owns
//! the per-tenant execute lock and the run idempotency guard.

pub mod locks;
mod migration;

pub use migration::{
    AnalyzeRequest, ExecuteRequest, ExecutionReport, HistoryQuery, MigrationPipeline,
    PipelineConfig, Preview, DEFAULT_LOCK_TIMEOUT,
};
