use std::sync::Arc;

use quicksync_pipeline::MigrationPipeline;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Migration engine bound to the configured entity and history stores.
    pub pipeline: Arc<MigrationPipeline>,
    pub config: Arc<ServerConfig>,
}
