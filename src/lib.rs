//! Gridshare library - re-exports for testing and external use.
//!
//! A collaborative grid: a sync bridge that keeps a local grid view and a
//! shared key-value document in step, a session bootstrapper that creates or
//! joins sessions from the address fragment, and the room backend that hosts
//! the shared documents.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod app;
pub mod bridge;
pub mod config;
pub mod document;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rooms;
pub mod session;
pub mod templates;

use config::Config;
use error::Result;
use rooms::RoomRegistry;

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let registry = RoomRegistry::open(&config)?;
        Ok(Self { config, registry })
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        // Session routes
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/{id}", get(handlers::session_info))
        .route("/api/sessions/{id}/ws", get(handlers::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Re-export commonly used types
pub use app::{BootstrapStatus, GridApp};

pub use bridge::{BridgeState, CellValueChanged, GridView, LocalGrid, RemoteApply, SyncBridge};

pub use document::{
    next_peer_id, Audience, ChangeOrigin, ChangeStream, DocumentChange, InMemoryDocument, PeerId,
    SharedDocument,
};

pub use error::SyncError;

pub use models::{
    decode_snapshot, default_columns, default_rows, encode_snapshot, ColumnDef, GridSnapshot,
    OlympicRow, SessionId, SessionMeta, GRID_DATA_KEY,
};

pub use rooms::{InProcessService, RoomDocument};

pub use session::{bootstrap, AddressFragment, CollabService, SessionContext};
