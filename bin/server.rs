// AAPS Registry - Web Server
// REST API with Axum

use aaps_registry::api::{router, AppState};
use aaps_registry::{db, logging, Settings};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "aaps-server", version, about = "AAPS registry REST API")]
struct Args {
    /// Settings file (default: aaps.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    logging::init(&settings.logging).context("Failed to initialise logging")?;

    // Open database
    let db_path = &settings.database.path;
    let conn = db::open(db_path).with_context(|| format!("Failed to open database {}", db_path.display()))?;
    db::setup_database(&conn).context("Failed to set up database")?;
    info!(path = %db_path.display(), "Database opened");

    // Create shared state
    let state = AppState::new(conn, settings.policy());
    info!(anonymous_read = state.policy.anonymous_read, "Permission policy loaded");

    // Build main router
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = settings.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Server running on http://{addr} (API under /api, back office under /admin)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Error while waiting for Ctrl+C: {e}");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Error while installing SIGTERM handler: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
