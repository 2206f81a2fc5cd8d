//! Repository for the `entities` table.

use quicksync_core::types::{EntityId, FieldMap, RunId};
use sqlx::{PgConnection, PgPool};

use crate::models::entity::EntityRow;

/// Column list for entities queries.
const COLUMNS: &str = "id, tenant_id, entity_type, external_id, state, fields, revision, \
    last_run_id, created_at, updated_at";

/// Provides the reads and writes the migration engine needs on entities.
pub struct EntityRepo;

impl EntityRepo {
    /// All entities of one type for a tenant, in any state.
    pub async fn list_by_type(
        pool: &PgPool,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<Vec<EntityRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM entities
             WHERE tenant_id = $1 AND entity_type = $2
             ORDER BY external_id"
        );
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(tenant_id)
            .bind(entity_type)
            .fetch_all(pool)
            .await
    }

    /// Find an entity by external id and lock its row until the surrounding
    /// transaction ends.
    pub async fn lock_by_external_id(
        conn: &mut PgConnection,
        tenant_id: &str,
        entity_type: &str,
        external_id: &str,
    ) -> Result<Option<EntityRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM entities
             WHERE tenant_id = $1 AND entity_type = $2 AND external_id = $3
             FOR UPDATE"
        );
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(tenant_id)
            .bind(entity_type)
            .bind(external_id)
            .fetch_optional(conn)
            .await
    }

    /// Insert a new active entity at revision 1.
    pub async fn insert(
        conn: &mut PgConnection,
        id: EntityId,
        tenant_id: &str,
        entity_type: &str,
        external_id: &str,
        fields: &FieldMap,
        run_id: RunId,
    ) -> Result<EntityRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO entities
                (id, tenant_id, entity_type, external_id, state, fields, revision, last_run_id)
             VALUES ($1, $2, $3, $4, 'active', $5, 1, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(id)
            .bind(tenant_id)
            .bind(entity_type)
            .bind(external_id)
            .bind(serde_json::Value::Object(fields.clone()))
            .bind(run_id)
            .fetch_one(conn)
            .await
    }

    /// Merge `changes` into an entity's fields, mark it active and bump its
    /// revision.
    pub async fn patch(
        conn: &mut PgConnection,
        id: EntityId,
        changes: &FieldMap,
        run_id: RunId,
    ) -> Result<EntityRow, sqlx::Error> {
        let query = format!(
            "UPDATE entities SET
                fields = fields || $2,
                state = 'active',
                revision = revision + 1,
                last_run_id = $3,
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, EntityRow>(&query)
            .bind(id)
            .bind(serde_json::Value::Object(changes.clone()))
            .bind(run_id)
            .fetch_one(conn)
            .await
    }
}
