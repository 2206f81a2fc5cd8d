use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quicksync_api::config::ServerConfig;
use quicksync_api::router::build_app_router;
use quicksync_api::state::AppState;
use quicksync_db::{MemoryStore, MigrationStore, PgStore};
use quicksync_pipeline::MigrationPipeline;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "quicksync_api=debug,quicksync_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Mapping profiles ---
    let profiles = config
        .load_profiles()
        .expect("Failed to load mapping profiles");
    tracing::info!(
        providers = ?profiles.providers().collect::<Vec<_>>(),
        "Mapping profiles loaded"
    );

    // --- Store ---
    let (pool, store): (Option<quicksync_db::DbPool>, Arc<dyn MigrationStore>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = quicksync_db::create_pool(database_url)
                    .await
                    .expect("Failed to connect to database");
                tracing::info!("Database connection pool created");

                quicksync_db::health_check(&pool)
                    .await
                    .expect("Database health check failed");
                tracing::info!("Database health check passed");

                quicksync_db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Database migrations applied");

                (Some(pool.clone()), Arc::new(PgStore::new(pool)))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using the in-memory store, data is lost on exit");
                (None, Arc::new(MemoryStore::new()))
            }
        };

    // --- App state ---
    let pipeline = MigrationPipeline::new(profiles, store, config.pipeline_config());
    let state = AppState {
        pipeline: Arc::new(pipeline),
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    if let Some(pool) = pool {
        let drain = Duration::from_secs(config.shutdown_timeout_secs);
        if tokio::time::timeout(drain, pool.close()).await.is_err() {
            tracing::warn!(timeout_secs = config.shutdown_timeout_secs, "Database pool did not close in time");
        } else {
            tracing::info!("Database pool closed");
        }
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
