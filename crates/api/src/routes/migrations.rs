//! Route definitions for the `/migrations` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::migrations;
use crate::state::AppState;

/// Routes mounted at `/migrations`.
///
/// ```text
/// POST /preview                    -> preview        (multipart)
/// POST /execute                    -> execute
/// GET  /history                    -> list_history   (?source&status&limit&offset)
/// GET  /history/{run_id}           -> get_run
/// GET  /history/{run_id}/entries   -> list_run_entries
/// GET  /providers                  -> list_providers
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/preview", post(migrations::preview))
        .route("/execute", post(migrations::execute))
        .route("/history", get(migrations::list_history))
        .route("/history/{run_id}", get(migrations::get_run))
        .route("/history/{run_id}/entries", get(migrations::list_run_entries))
        .route("/providers", get(migrations::list_providers))
}
