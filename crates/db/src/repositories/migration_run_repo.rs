//! Repository for the `migration_runs` table.

use quicksync_core::diff::PreviewRow;
use quicksync_core::run::{MigrationRun, RunFilter};
use quicksync_core::types::RunId;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::models::migration_run::MigrationRunRow;

/// Column list for migration_runs queries.
const COLUMNS: &str = "run_id, tenant_id, source_provider, entity_type, mode, filename, \
    status, counts, total_rows, started_at, completed_at, summary_text, \
    failure_external_id, failure_reason";

/// Provides insert, finalize and query operations for migration runs.
pub struct MigrationRunRepo;

impl MigrationRunRepo {
    /// Insert a pending run with its preview rows. Returns `None` if the run
    /// id is already taken.
    pub async fn create(
        pool: &PgPool,
        run: &MigrationRun,
        preview: &[PreviewRow],
    ) -> Result<Option<MigrationRunRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO migration_runs
                (run_id, tenant_id, source_provider, entity_type, mode, filename,
                 status, counts, total_rows, started_at, preview)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (run_id) DO NOTHING
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MigrationRunRow>(&query)
            .bind(run.run_id)
            .bind(&run.tenant_id)
            .bind(&run.source_provider)
            .bind(&run.entity_type)
            .bind(run.mode.as_str())
            .bind(&run.filename)
            .bind(run.status.as_str())
            .bind(Json(run.counts))
            .bind(run.total_rows as i64)
            .bind(run.started_at)
            .bind(Json(preview))
            .fetch_optional(pool)
            .await
    }

    /// Preview rows stored with a run.
    pub async fn find_preview(
        pool: &PgPool,
        run_id: RunId,
    ) -> Result<Option<Vec<PreviewRow>>, sqlx::Error> {
        let preview: Option<Json<Vec<PreviewRow>>> =
            sqlx::query_scalar("SELECT preview FROM migration_runs WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(pool)
                .await?;
        Ok(preview.map(|p| p.0))
    }

    /// Write the terminal state of a run. Only matches a run that is still
    /// pending; returns `None` otherwise.
    pub async fn finalize(
        conn: &mut PgConnection,
        run: &MigrationRun,
    ) -> Result<Option<MigrationRunRow>, sqlx::Error> {
        let query = format!(
            "UPDATE migration_runs SET
                status = $2,
                counts = $3,
                total_rows = $4,
                completed_at = $5,
                summary_text = $6,
                failure_external_id = $7,
                failure_reason = $8
             WHERE run_id = $1 AND status = 'pending'
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MigrationRunRow>(&query)
            .bind(run.run_id)
            .bind(run.status.as_str())
            .bind(Json(run.counts))
            .bind(run.total_rows as i64)
            .bind(run.completed_at)
            .bind(&run.summary_text)
            .bind(run.failure.as_ref().map(|f| f.external_id.as_str()))
            .bind(run.failure.as_ref().map(|f| f.reason.as_str()))
            .fetch_optional(conn)
            .await
    }

    /// Find a run by id, regardless of tenant.
    pub async fn find_by_id(
        conn: &mut PgConnection,
        run_id: RunId,
    ) -> Result<Option<MigrationRunRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migration_runs WHERE run_id = $1");
        sqlx::query_as::<_, MigrationRunRow>(&query)
            .bind(run_id)
            .fetch_optional(conn)
            .await
    }

    /// Find a tenant's run by id.
    pub async fn find_for_tenant(
        pool: &PgPool,
        tenant_id: &str,
        run_id: RunId,
    ) -> Result<Option<MigrationRunRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM migration_runs WHERE run_id = $1 AND tenant_id = $2");
        sqlx::query_as::<_, MigrationRunRow>(&query)
            .bind(run_id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    /// List a tenant's runs, newest first.
    pub async fn list(
        pool: &PgPool,
        tenant_id: &str,
        filter: &RunFilter,
    ) -> Result<Vec<MigrationRunRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM migration_runs
             WHERE tenant_id = $1
               AND ($2::text IS NULL OR lower(source_provider) = lower($2))
               AND ($3::text IS NULL OR status = $3)
             ORDER BY started_at DESC, run_id DESC
             LIMIT $4 OFFSET $5"
        );
        sqlx::query_as::<_, MigrationRunRow>(&query)
            .bind(tenant_id)
            .bind(filter.provider.as_deref())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(pool)
            .await
    }
}
