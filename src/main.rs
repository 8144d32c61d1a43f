//! Gridshare - collaborative grid server.
//!
//! Serves the grid page and hosts the shared documents that keep every tab
//! of a session in sync. The application is organized into these modules:
//!
//! - `rooms`: session rooms, persistence and peer counts
//! - `handlers`: HTTP and WebSocket route handlers
//! - `templates`: the grid page and its sync script
//! - `session` / `bridge` / `app`: the Rust side of the sync protocol

use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gridshare::{config::Config, router, AppState};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Default to INFO, override with RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let config = Config::from_env();
    let state = match AppState::new(config.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, db = %config.db_path.display(), "failed to open database");
            std::process::exit(1);
        }
    };

    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&config.addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %config.addr, db = %config.db_path.display(), "gridshare server running");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
    }
}
