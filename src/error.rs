//! Error type shared by the session, bridge and room layers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Collaboration backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Document error: {0}")]
    Document(#[from] automerge::AutomergeError),

    #[error("Invalid bridge state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
