//! Repository for the `migration_run_entries` table.

use quicksync_core::run::RunEntryLog;
use quicksync_core::types::RunId;
use sqlx::{PgConnection, PgPool};

use crate::models::run_entry::RunEntryRow;

/// Column list for migration_run_entries queries.
const COLUMNS: &str = "run_id, source_row_index, external_id, entry_type, outcome, entity_id";

/// Provides insert and list operations for the per-entry run log.
pub struct RunEntryRepo;

impl RunEntryRepo {
    /// Insert every log line of a run in one statement.
    pub async fn insert_many(
        conn: &mut PgConnection,
        entries: &[RunEntryLog],
    ) -> Result<u64, sqlx::Error> {
        if entries.is_empty() {
            return Ok(0);
        }
        let run_ids: Vec<RunId> = entries.iter().map(|e| e.run_id).collect();
        let rows: Vec<i64> = entries.iter().map(|e| e.source_row_index as i64).collect();
        let external_ids: Vec<&str> = entries.iter().map(|e| e.external_id.as_str()).collect();
        let types: Vec<&str> = entries.iter().map(|e| e.entry_type.as_str()).collect();
        let outcomes: Vec<&str> = entries.iter().map(|e| e.outcome.as_str()).collect();
        let entity_ids: Vec<Option<uuid::Uuid>> = entries.iter().map(|e| e.entity_id).collect();

        let result = sqlx::query(
            "INSERT INTO migration_run_entries
                (run_id, source_row_index, external_id, entry_type, outcome, entity_id)
             SELECT * FROM UNNEST($1::uuid[], $2::bigint[], $3::text[], $4::text[], $5::text[], $6::uuid[])",
        )
        .bind(&run_ids)
        .bind(&rows)
        .bind(&external_ids)
        .bind(&types)
        .bind(&outcomes)
        .bind(&entity_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// List the log of a run in source row order.
    pub async fn list_by_run(
        pool: &PgPool,
        run_id: RunId,
    ) -> Result<Vec<RunEntryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM migration_run_entries
             WHERE run_id = $1
             ORDER BY source_row_index ASC"
        );
        sqlx::query_as::<_, RunEntryRow>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }
}
