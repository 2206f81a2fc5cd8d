pub mod health;
pub mod migrations;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /migrations/preview                         upload and classify a file (POST)
/// /migrations/execute                         apply a reviewed preview (POST)
/// /migrations/history                         list runs (GET)
/// /migrations/history/{run_id}                run detail (GET)
/// /migrations/history/{run_id}/entries        per-entry log (GET)
/// /migrations/providers                       mapping profiles (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/migrations", migrations::router())
}
